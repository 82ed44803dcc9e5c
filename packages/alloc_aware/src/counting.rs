//! Allocator wrapper that counts the calls made through it.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64, AtomicUsize};

use crate::{AllocError, Allocator, Global};

/// Counters shared by all clones of one [`CountingAllocator`].
#[derive(Debug, Default)]
struct Counters {
    allocations: AtomicU64,
    reallocations: AtomicU64,
    deallocations: AtomicU64,
    live_bytes: AtomicUsize,
}

/// A point-in-time copy of the counters of a [`CountingAllocator`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct AllocationCounts {
    /// Number of successful `allocate` calls.
    pub allocations: u64,

    /// Number of successful `reallocate` calls.
    pub reallocations: u64,

    /// Number of `deallocate` calls.
    pub deallocations: u64,

    /// Bytes currently held by blocks obtained through the allocator.
    pub live_bytes: usize,
}

/// An instrumented allocator that forwards to another allocator and counts every call.
///
/// Clones share their counters and compare equal, because a block obtained through one clone
/// may be released through another. Independently created instances never compare equal, which
/// makes this type useful for exercising the "non-interchangeable allocators" paths of the
/// containers as well.
///
/// # Examples
///
/// ```
/// use alloc_aware::{CountingAllocator, SmallVec};
///
/// let allocator = CountingAllocator::new();
/// let mut items = SmallVec::<u64, _>::new_in(allocator.clone());
///
/// items.push(1);
/// assert_eq!(allocator.counts().allocations, 0);
///
/// for i in 0..100 {
///     items.push(i);
/// }
/// assert!(allocator.counts().allocations > 0);
/// ```
#[derive(Clone, Debug)]
pub struct CountingAllocator<A = Global> {
    inner: A,
    counters: Arc<Counters>,
}

impl CountingAllocator<Global> {
    /// Creates a counting allocator that forwards to the [`Global`] heap.
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(Global)
    }
}

impl Default for CountingAllocator<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> CountingAllocator<A> {
    /// Creates a counting allocator that forwards to `inner`, with all counters at zero.
    #[must_use]
    pub fn wrap(inner: A) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Returns the current value of every counter.
    #[must_use]
    pub fn counts(&self) -> AllocationCounts {
        // Relaxed is sufficient: we only need atomicity, not ordering w.r.t. other memory ops.
        AllocationCounts {
            allocations: self.counters.allocations.load(atomic::Ordering::Relaxed),
            reallocations: self.counters.reallocations.load(atomic::Ordering::Relaxed),
            deallocations: self.counters.deallocations.load(atomic::Ordering::Relaxed),
            live_bytes: self.counters.live_bytes.load(atomic::Ordering::Relaxed),
        }
    }

    /// Returns the wrapped allocator.
    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: PartialEq> PartialEq for CountingAllocator<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.counters, &other.counters) && self.inner == other.inner
    }
}

impl<A: Allocator> Allocator for CountingAllocator<A> {
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.inner.try_allocate(layout)?;

        self.counters
            .allocations
            .fetch_add(1, atomic::Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_add(layout.size(), atomic::Ordering::Relaxed);

        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees; clones share the inner allocator identity.
        unsafe {
            self.inner.deallocate(ptr, layout);
        }

        self.counters
            .deallocations
            .fetch_add(1, atomic::Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_sub(layout.size(), atomic::Ordering::Relaxed);
    }

    unsafe fn try_reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: Forwarding the caller's guarantees.
        let new_ptr = unsafe { self.inner.try_reallocate(ptr, old_layout, new_layout)? };

        self.counters
            .reallocations
            .fetch_add(1, atomic::Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_sub(old_layout.size(), atomic::Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_add(new_layout.size(), atomic::Ordering::Relaxed);

        Ok(new_ptr)
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(CountingAllocator: Send, Sync, Clone, std::fmt::Debug);

    #[test]
    fn counts_every_kind_of_call() {
        let allocator = CountingAllocator::new();
        let small = Layout::from_size_align(16, 8).unwrap();
        let large = Layout::from_size_align(64, 8).unwrap();

        let ptr = allocator.allocate(small);
        assert_eq!(
            allocator.counts(),
            AllocationCounts {
                allocations: 1,
                reallocations: 0,
                deallocations: 0,
                live_bytes: 16,
            }
        );

        let ptr = unsafe { allocator.reallocate(ptr, small, large) };
        assert_eq!(allocator.counts().reallocations, 1);
        assert_eq!(allocator.counts().live_bytes, 64);

        unsafe { allocator.deallocate(ptr, large) };
        assert_eq!(
            allocator.counts(),
            AllocationCounts {
                allocations: 1,
                reallocations: 1,
                deallocations: 1,
                live_bytes: 0,
            }
        );
    }

    #[test]
    fn clones_share_counters_and_are_interchangeable() {
        let a = CountingAllocator::new();
        let b = a.clone();
        let layout = Layout::new::<u64>();

        let ptr = a.allocate(layout);
        unsafe { b.deallocate(ptr, layout) };

        assert_eq!(a, b);
        assert_eq!(a.counts().allocations, 1);
        assert_eq!(b.counts().deallocations, 1);
        assert_eq!(a.counts().live_bytes, 0);
    }

    #[test]
    fn independent_instances_are_not_interchangeable() {
        let a = CountingAllocator::new();
        let b = CountingAllocator::new();

        assert_ne!(a, b);
    }

    #[test]
    fn wraps_other_allocators() {
        let inner = CountingAllocator::new();
        let outer = CountingAllocator::wrap(inner.clone());
        let layout = Layout::new::<u32>();

        let ptr = outer.allocate(layout);
        unsafe { outer.deallocate(ptr, layout) };

        assert_eq!(outer.counts().allocations, 1);
        assert_eq!(outer.inner().counts().allocations, 1);
        assert_eq!(inner.counts().deallocations, 1);
    }
}
