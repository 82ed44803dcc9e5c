use std::alloc::{self, Layout};
use std::cmp;
use std::ptr::{self, NonNull};

use crate::AllocError;

/// The minimal capability every allocator used by the containers in this crate provides.
///
/// Containers only call into the allocator when they cross a growth boundary, so allocators
/// may be stateless (such as [`Global`]) or carry state such as an arena handle or counters.
///
/// # Equality
///
/// Two allocator instances compare equal if and only if they are interchangeable: a block
/// obtained from one of them may be released through the other. Containers rely on this when
/// deciding whether a heap block can change owners directly during a move.
///
/// # Failure
///
/// The `try_` methods report failure as [`AllocError`]. The infallible forms treat failure as
/// fatal and terminate the process through [`std::alloc::handle_alloc_error()`]. Containers use
/// the infallible forms everywhere except in their own `try_reserve()` methods.
pub trait Allocator: PartialEq {
    /// Returns a fresh, uninitialized block of at least `layout.size()` bytes aligned to
    /// `layout.align()`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the request cannot be satisfied.
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block previously returned by this allocator (or one equal to it).
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by [`try_allocate()`][Self::try_allocate]
    /// or [`try_reallocate()`][Self::try_reallocate] of an allocator equal to this one, with
    /// exactly `layout`, and that the block has not already been released.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Grows or shrinks a block, preserving the first `min(old_layout.size(), new_layout.size())`
    /// bytes. On success the old block must be treated as released.
    ///
    /// The provided implementation always allocates a new block, copies the preserved bytes and
    /// releases the old block. Allocators that can resize in place should override it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the new block cannot be obtained. The old block is then still
    /// owned by the caller and remains valid.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is a live block of this allocator that was obtained
    /// with exactly `old_layout`.
    unsafe fn try_reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<u8>, AllocError> {
        let new_ptr = self.try_allocate(new_layout)?;
        let preserved = cmp::min(old_layout.size(), new_layout.size());

        // SAFETY: Both blocks are at least `preserved` bytes long, the old one by the caller's
        // guarantee and the new one because it was just allocated with `new_layout`. They are
        // distinct live blocks, so they cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), preserved);
        }

        // SAFETY: Forwarding the caller's guarantee that `ptr` was obtained with `old_layout`.
        unsafe {
            self.deallocate(ptr, old_layout);
        }

        Ok(new_ptr)
    }

    /// Like [`try_allocate()`][Self::try_allocate] but failure terminates the process.
    #[must_use]
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        match self.try_allocate(layout) {
            Ok(ptr) => ptr,
            Err(error) => alloc::handle_alloc_error(error.layout),
        }
    }

    /// Like [`try_reallocate()`][Self::try_reallocate] but failure terminates the process.
    ///
    /// # Safety
    ///
    /// Same requirements as [`try_reallocate()`][Self::try_reallocate].
    #[must_use]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> NonNull<u8> {
        // SAFETY: Forwarding the caller's guarantees.
        match unsafe { self.try_reallocate(ptr, old_layout, new_layout) } {
            Ok(ptr) => ptr,
            Err(error) => alloc::handle_alloc_error(error.layout),
        }
    }
}

/// The process-wide heap, as exposed by [`std::alloc`].
///
/// All instances are interchangeable and therefore compare equal. This is the default
/// allocator of every container in the crate.
///
/// Zero-sized requests never reach the system allocator: a well-aligned dangling pointer is
/// returned instead and releasing it is a no-op.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Global;

impl Allocator for Global {
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }

        // SAFETY: The layout has a non-zero size, which is the only requirement of `alloc()`.
        let ptr = unsafe { alloc::alloc(layout) };

        NonNull::new(ptr).ok_or_else(|| AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        // SAFETY: The caller guarantees the block came from us with this exact layout and it
        // is non-zero-sized, so it came from `alloc()` or `realloc()`.
        unsafe {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }

    unsafe fn try_reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<u8>, AllocError> {
        // The system `realloc()` keeps the original alignment, so it is only usable when the
        // alignment stays the same. Zero-sized blocks never came from the system allocator.
        if old_layout.size() == 0
            || new_layout.size() == 0
            || old_layout.align() != new_layout.align()
        {
            let new_ptr = self.try_allocate(new_layout)?;
            let preserved = cmp::min(old_layout.size(), new_layout.size());

            // SAFETY: Both blocks are live and at least `preserved` bytes long; a fresh block
            // cannot overlap a block the caller still owns.
            unsafe {
                ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), preserved);
            }

            // SAFETY: Forwarding the caller's guarantee about `ptr` and `old_layout`.
            unsafe {
                self.deallocate(ptr, old_layout);
            }

            return Ok(new_ptr);
        }

        // SAFETY: `ptr` is a live system block allocated with `old_layout` (caller guarantee),
        // the new size is non-zero and, coming from a valid `Layout`, does not overflow `isize`
        // when rounded up to the shared alignment.
        let new_ptr = unsafe { alloc::realloc(ptr.as_ptr(), old_layout, new_layout.size()) };

        NonNull::new(new_ptr).ok_or_else(|| AllocError::new(new_layout))
    }
}

/// Returns the layout of an array of `len` contiguous values of type `T`.
///
/// # Panics
///
/// Panics if the total size overflows `isize::MAX`.
#[must_use]
pub fn array_layout<T>(len: usize) -> Layout {
    Layout::array::<T>(len).expect("array layout size cannot exceed isize::MAX")
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: A layout alignment is never zero, so the pointer is non-null.
    unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(layout.align())) }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Global: Send, Sync, Copy, Default, std::fmt::Debug);

    /// Allocator that only provides the required methods, exercising the provided
    /// reallocation logic.
    #[derive(Debug, Default)]
    struct MinimalAllocator {
        live: Cell<usize>,
    }

    impl PartialEq for MinimalAllocator {
        fn eq(&self, _other: &Self) -> bool {
            true
        }
    }

    impl Allocator for MinimalAllocator {
        fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            self.live.set(self.live.get() + 1);
            Global.try_allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.set(self.live.get() - 1);
            unsafe { Global.deallocate(ptr, layout) };
        }
    }

    fn fill(ptr: NonNull<u8>, len: usize) {
        for i in 0..len {
            unsafe { ptr.add(i).write(i as u8) };
        }
    }

    fn check(ptr: NonNull<u8>, len: usize) {
        for i in 0..len {
            assert_eq!(unsafe { ptr.add(i).read() }, i as u8);
        }
    }

    #[test]
    fn global_allocate_honors_alignment() {
        for align in [1_usize, 2, 8, 64, 4096] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let ptr = Global.allocate(layout);

            assert_eq!(ptr.as_ptr() as usize % align, 0);

            unsafe { Global.deallocate(ptr, layout) };
        }
    }

    #[test]
    fn global_zero_sized_is_dangling_and_aligned() {
        let layout = Layout::from_size_align(0, 32).unwrap();
        let ptr = Global.allocate(layout);

        assert_eq!(ptr.as_ptr() as usize, 32);

        // Releasing must be a no-op rather than reaching the system allocator.
        unsafe { Global.deallocate(ptr, layout) };
    }

    #[test]
    fn global_reallocate_preserves_prefix_when_growing() {
        let old = Layout::from_size_align(16, 8).unwrap();
        let new = Layout::from_size_align(256, 8).unwrap();

        let ptr = Global.allocate(old);
        fill(ptr, 16);

        let ptr = unsafe { Global.reallocate(ptr, old, new) };
        check(ptr, 16);

        unsafe { Global.deallocate(ptr, new) };
    }

    #[test]
    fn global_reallocate_preserves_prefix_when_shrinking() {
        let old = Layout::from_size_align(128, 8).unwrap();
        let new = Layout::from_size_align(8, 8).unwrap();

        let ptr = Global.allocate(old);
        fill(ptr, 128);

        let ptr = unsafe { Global.reallocate(ptr, old, new) };
        check(ptr, 8);

        unsafe { Global.deallocate(ptr, new) };
    }

    #[test]
    fn global_reallocate_to_stricter_alignment_moves_block() {
        let old = Layout::from_size_align(32, 1).unwrap();
        let new = Layout::from_size_align(64, 256).unwrap();

        let ptr = Global.allocate(old);
        fill(ptr, 32);

        let ptr = unsafe { Global.reallocate(ptr, old, new) };
        assert_eq!(ptr.as_ptr() as usize % 256, 0);
        check(ptr, 32);

        unsafe { Global.deallocate(ptr, new) };
    }

    #[test]
    fn global_reallocate_from_zero_sized() {
        let old = Layout::from_size_align(0, 8).unwrap();
        let new = Layout::from_size_align(64, 8).unwrap();

        let ptr = Global.allocate(old);
        let ptr = unsafe { Global.reallocate(ptr, old, new) };
        fill(ptr, 64);
        check(ptr, 64);

        unsafe { Global.deallocate(ptr, new) };
    }

    #[test]
    fn provided_reallocate_copies_and_releases() {
        let allocator = MinimalAllocator::default();
        let old = Layout::from_size_align(8, 4).unwrap();
        let new = Layout::from_size_align(40, 4).unwrap();

        let ptr = allocator.allocate(old);
        fill(ptr, 8);
        assert_eq!(allocator.live.get(), 1);

        let ptr = unsafe { allocator.reallocate(ptr, old, new) };
        check(ptr, 8);
        assert_eq!(allocator.live.get(), 1);

        unsafe { allocator.deallocate(ptr, new) };
        assert_eq!(allocator.live.get(), 0);
    }

    #[test]
    fn global_instances_are_interchangeable() {
        assert_eq!(Global, Global);
        assert_eq!(Global::default(), Global);
    }

    #[test]
    fn array_layout_multiplies_size() {
        let layout = array_layout::<u32>(10);
        assert_eq!(layout.size(), 40);
        assert_eq!(layout.align(), 4);
    }

    #[test]
    #[should_panic]
    fn array_layout_overflow_panics() {
        let _layout = array_layout::<u64>(usize::MAX);
    }
}
