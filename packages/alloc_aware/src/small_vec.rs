use std::alloc::Layout;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use tracing::trace;

use crate::{
    Allocator, Global, ReserveError, array_layout, destroy_n, is_trivially_relocatable,
    relocate_n,
};
use crate::error::fail_reserve;

/// Set in the length word while the elements live in a heap block. The length word is stored
/// little-endian, so this bit lands in the last byte of the footprint, where an inline
/// container keeps its length.
const HEAP_FLAG: usize = 1 << (usize::BITS - 1);

/// Same bit as [`HEAP_FLAG`], seen through the last byte of the footprint.
const HEAP_FLAG_BYTE: u8 = 0x80;

/// Largest capacity a [`SmallVec`] can be asked for. A power of two, so rounding any valid
/// request up to the next power of two never exceeds it, and far enough below [`HEAP_FLAG`]
/// that a length can never collide with the mode bit.
const MAX_CAPACITY: usize = 1 << (usize::BITS - 2);

/// Size of the footprint shared by the inline elements and the heap descriptor.
const FOOTPRINT_BYTES: usize = mem::size_of::<HeapRepr<u8>>();

/// Offset of the byte that holds the inline length and the mode bit.
const MODE_BYTE: usize = FOOTPRINT_BYTES - 1;

const _: () = assert!(FOOTPRINT_BYTES == 3 * mem::size_of::<usize>());
const _: () = assert!(MODE_BYTE < 0x80);

/// Heap-mode view of the footprint.
#[repr(C)]
struct HeapRepr<T> {
    ptr: NonNull<T>,
    capacity: usize,

    /// `len | HEAP_FLAG` in little-endian byte order.
    len_le: [u8; mem::size_of::<usize>()],
}

impl<T> Clone for HeapRepr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HeapRepr<T> {}

impl<T> HeapRepr<T> {
    fn new(ptr: NonNull<T>, capacity: usize, len: usize) -> Self {
        Self {
            ptr,
            capacity,
            len_le: (len | HEAP_FLAG).to_le_bytes(),
        }
    }

    fn len(&self) -> usize {
        usize::from_le_bytes(self.len_le) & !HEAP_FLAG
    }
}

/// The container's whole storage footprint.
///
/// In inline mode the leading bytes hold up to `INLINE_CAPACITY` elements and the last byte
/// holds the element count. In heap mode it is a [`HeapRepr`]. The high bit of the last byte
/// tells the two apart.
union Footprint<T> {
    bytes: [MaybeUninit<u8>; FOOTPRINT_BYTES],
    heap: HeapRepr<T>,
}

impl<T> Clone for Footprint<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Footprint<T> {}

impl<T> Footprint<T> {
    const EMPTY: Self = Self {
        bytes: [MaybeUninit::new(0); FOOTPRINT_BYTES],
    };
}

#[expect(
    clippy::integer_division,
    reason = "we want the number of whole elements that fit"
)]
const fn inline_capacity<T>() -> usize {
    if mem::align_of::<T>() > mem::align_of::<HeapRepr<u8>>() {
        0
    } else if mem::size_of::<T>() == 0 {
        // Bounded by what the length byte can count.
        MODE_BYTE
    } else {
        MODE_BYTE / mem::size_of::<T>()
    }
}

/// A contiguous, growable sequence that stores small numbers of elements inline.
///
/// Up to [`INLINE_CAPACITY`][Self::INLINE_CAPACITY] elements are kept inside the container
/// itself, reusing the bytes that would otherwise describe a heap block. The first time more room
/// is needed the elements move into a heap block obtained from the container's [`Allocator`],
/// and the container stays heap-resident from then on (clearing keeps the block).
///
/// Heap capacities are always powers of two. Growing an existing heap block goes through
/// [`Allocator::reallocate()`], so the allocator may extend it in place.
///
/// # Moves
///
/// A plain Rust move of a `SmallVec` transfers everything it owns. For the cases where the
/// source must stay usable, [`take()`][Self::take] and [`move_from()`][Self::move_from] leave the
/// source empty and inline, transferring a heap block in constant time where the allocators
/// allow it.
///
/// # Examples
///
/// ```
/// use alloc_aware::SmallVec;
///
/// let mut numbers = SmallVec::<u32>::new();
/// assert_eq!(SmallVec::<u32>::INLINE_CAPACITY, 5);
///
/// for i in 0..5 {
///     numbers.push(i);
/// }
/// assert!(numbers.is_inline());
///
/// numbers.push(5);
/// assert!(!numbers.is_inline());
/// assert_eq!(numbers.capacity(), 8);
/// assert_eq!(&numbers[..], &[0, 1, 2, 3, 4, 5]);
/// ```
pub struct SmallVec<T, A: Allocator = Global> {
    /// Elements or heap descriptor, plus the element count and the mode bit.
    footprint: Footprint<T>,

    allocator: A,

    _owns: PhantomData<T>,
}

// SAFETY: The container exclusively owns its elements and its allocator; sending it sends them.
unsafe impl<T: Send, A: Allocator + Send> Send for SmallVec<T, A> {}

// SAFETY: Shared access only hands out shared references to elements and the allocator.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for SmallVec<T, A> {}

impl<T> SmallVec<T, Global> {
    /// Creates an empty, inline container using the [`Global`] allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self::new_in(Global)
    }

    /// Creates a container holding clones of `items`, using the [`Global`] allocator.
    #[must_use]
    pub fn from_slice(items: &[T]) -> Self
    where
        T: Clone,
    {
        Self::from_slice_in(items, Global)
    }
}

impl<T, A: Allocator> SmallVec<T, A> {
    /// Number of elements that fit without a heap block.
    ///
    /// This is how many `T` fit into the container's own three-word footprint after reserving
    /// one byte for the length. On 64-bit targets that is 23 bytes: five `u32` or two `u64`.
    /// It is zero for element types larger than that or aligned more strictly than a pointer.
    /// Zero-sized types get as many inline slots as there are bytes before the length byte.
    pub const INLINE_CAPACITY: usize = inline_capacity::<T>();

    /// Largest capacity that may be requested. Larger requests are fatal in
    /// [`reserve()`][Self::reserve] and an error in [`try_reserve()`][Self::try_reserve].
    pub const MAX_CAPACITY: usize = MAX_CAPACITY;

    /// Creates an empty, inline container that will obtain heap blocks from `allocator`.
    #[must_use]
    pub const fn new_in(allocator: A) -> Self {
        Self {
            footprint: Footprint::EMPTY,
            allocator,
            _owns: PhantomData,
        }
    }

    /// Creates an empty container with room for at least `capacity` elements.
    #[must_use]
    pub fn with_capacity_in(capacity: usize, allocator: A) -> Self {
        let mut items = Self::new_in(allocator);
        items.reserve(capacity);
        items
    }

    /// Creates a container holding clones of `items`.
    #[must_use]
    pub fn from_slice_in(items: &[T], allocator: A) -> Self
    where
        T: Clone,
    {
        let mut result = Self::with_capacity_in(items.len(), allocator);

        for item in items {
            result.push(item.clone());
        }

        result
    }

    /// Returns the number of elements.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        if self.is_inline() {
            usize::from(self.mode_byte())
        } else {
            self.heap_repr().len()
        }
    }

    /// Returns `true` if there are no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while the elements are stored inside the container rather than in a
    /// heap block.
    #[must_use]
    #[inline]
    pub fn is_inline(&self) -> bool {
        self.mode_byte() & HEAP_FLAG_BYTE == 0
    }

    /// Returns the number of elements the container can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        if self.is_inline() {
            Self::INLINE_CAPACITY
        } else {
            self.heap_repr().capacity
        }
    }

    /// Returns the allocator used for heap blocks.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Returns a pointer to the first element slot.
    ///
    /// While the container is inline this points into the container itself and is invalidated
    /// when the container moves.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        if !self.is_inline() {
            self.heap_repr().ptr.as_ptr().cast_const()
        } else if Self::INLINE_CAPACITY == 0 {
            NonNull::<T>::dangling().as_ptr().cast_const()
        } else {
            NonNull::from(&self.footprint).cast::<T>().as_ptr().cast_const()
        }
    }

    /// Returns a mutable pointer to the first element slot.
    ///
    /// Together with [`resize_uninit()`][Self::resize_uninit] this allows filling elements in
    /// place.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data_mut().as_ptr()
    }

    /// Returns the elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The first `len` slots are initialized, and the pointer is non-null and
        // aligned even when there are no elements.
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    /// Returns the elements as a mutable slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len();

        // SAFETY: As in `as_slice()`, plus we hold an exclusive borrow of the container.
        unsafe { slice::from_raw_parts_mut(self.as_mut_ptr(), len) }
    }

    /// Appends an element, growing the storage first if it is full, and returns a reference
    /// to the new element.
    ///
    /// # Panics
    ///
    /// Panics if the container already holds [`MAX_CAPACITY`][Self::MAX_CAPACITY] elements.
    pub fn push(&mut self, value: T) -> &mut T {
        let len = self.len();

        if len == self.capacity() {
            // Cannot overflow: the length never exceeds MAX_CAPACITY.
            self.grow(len.wrapping_add(1));
        }

        // SAFETY: After the growth above, `len < capacity`, so the slot lies within storage.
        let slot = unsafe { self.data_mut().add(len) };

        // SAFETY: The slot is within storage, aligned and currently uninitialized.
        unsafe {
            slot.write(value);
        }

        self.set_len(len.wrapping_add(1));

        // SAFETY: The slot was just initialized and we hold an exclusive borrow of `self`.
        unsafe { &mut *slot.as_ptr() }
    }

    /// Ensures the container can hold at least `capacity` elements without growing again.
    ///
    /// Does nothing if the current capacity already suffices; capacity never decreases.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`][Self::MAX_CAPACITY] or the storage size
    /// overflows `isize::MAX`. Allocation failure terminates the process.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity() {
            return;
        }

        self.grow(capacity);
    }

    /// Fallible version of [`reserve()`][Self::reserve].
    ///
    /// # Errors
    ///
    /// Returns [`ReserveError::CapacityOverflow`] if the request is too large to represent and
    /// [`ReserveError::AllocFailed`] if the allocator cannot provide the block. The container is
    /// unchanged in both cases.
    pub fn try_reserve(&mut self, capacity: usize) -> Result<(), ReserveError> {
        if capacity <= self.capacity() {
            return Ok(());
        }

        self.try_grow(capacity)
    }

    /// Sets the length to `new_len`.
    ///
    /// Shrinking drops the elements past `new_len`. Growing reserves room as needed and leaves
    /// the new slots uninitialized.
    ///
    /// # Safety
    ///
    /// When growing, the caller must initialize every slot in `old_len..new_len` (for example
    /// via [`as_mut_ptr()`][Self::as_mut_ptr]) before the elements are read or dropped,
    /// including by dropping the container.
    pub unsafe fn resize_uninit(&mut self, new_len: usize) {
        if new_len <= self.len() {
            self.truncate(new_len);
            return;
        }

        self.reserve(new_len);
        self.set_len(new_len);
    }

    /// Resizes to `new_len`, filling new slots with values produced by `f` and dropping
    /// elements past `new_len` when shrinking.
    pub fn resize_with(&mut self, new_len: usize, mut f: impl FnMut() -> T) {
        let len = self.len();

        if new_len <= len {
            self.truncate(new_len);
            return;
        }

        self.reserve(new_len);

        for _ in len..new_len {
            self.push(f());
        }
    }

    /// Resizes to `new_len`, filling new slots with clones of `value`.
    pub fn resize(&mut self, new_len: usize, value: T)
    where
        T: Clone,
    {
        self.resize_with(new_len, || value.clone());
    }

    /// Drops all elements. The capacity, including any heap block, is retained.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Moves all elements into a new container, leaving `self` empty and inline.
    ///
    /// The new container uses a clone of the allocator. If the clone is interchangeable with
    /// the original, a heap block changes owners in constant time, so the returned container's
    /// storage address equals the one `self` had. Otherwise the elements are relocated into
    /// storage obtained from the clone and `self` returns its block to its own allocator, as
    /// in [`move_from()`][Self::move_from]. Inline elements are relocated together with the
    /// whole inline region in one copy.
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        let allocator = self.allocator.clone();

        if !self.is_inline() && allocator != self.allocator {
            let mut taken = Self::new_in(allocator);
            taken.move_from(self);
            return taken;
        }

        let taken = Self {
            footprint: self.footprint,
            allocator,
            _owns: PhantomData,
        };

        // The elements (or the block that holds them) now belong to `taken`.
        self.footprint = Footprint::EMPTY;

        taken
    }

    /// Replaces the contents of `self` with the elements of `other`, leaving `other` empty
    /// and inline.
    ///
    /// The previous elements of `self` are dropped. If `other` owns a heap block and the two
    /// allocators are interchangeable, `self` adopts that block in constant time. If `other` is
    /// inline, its inline region is relocated in one copy. Otherwise `self` keeps its own
    /// allocator, relocates the elements into storage obtained from it and `other` releases its
    /// block through its own allocator.
    pub fn move_from(&mut self, other: &mut Self) {
        if other.is_inline() || self.allocator == other.allocator {
            self.release();

            self.footprint = other.footprint;
            other.footprint = Footprint::EMPTY;
            return;
        }

        let len = other.len();

        self.clear();
        self.reserve(len);

        // SAFETY: `other` holds `len` initialized elements, we just made room for `len`
        // elements and the two containers own distinct storage.
        unsafe {
            relocate_n(self.data_mut(), other.data_mut(), len);
        }

        // The elements now belong to `self`; `other` only has to return its empty block.
        other.set_len(0);
        self.set_len(len);
        other.release();
    }

    fn mode_byte(&self) -> u8 {
        let mode = NonNull::from(&self.footprint).cast::<u8>();

        // SAFETY: The last byte lies within the footprint and is initialized in both modes: it
        // holds the inline length or the high byte of the heap length word.
        unsafe { mode.add(MODE_BYTE).read() }
    }

    fn heap_repr(&self) -> HeapRepr<T> {
        debug_assert!(!self.is_inline());

        // SAFETY: The mode bit is set, so the whole footprint holds an initialized `HeapRepr`.
        unsafe { self.footprint.heap }
    }

    fn set_heap(&mut self, ptr: NonNull<T>, capacity: usize, len: usize) {
        self.footprint.heap = HeapRepr::new(ptr, capacity, len);
    }

    fn data_mut(&mut self) -> NonNull<T> {
        if !self.is_inline() {
            self.heap_repr().ptr
        } else if Self::INLINE_CAPACITY == 0 {
            NonNull::dangling()
        } else {
            NonNull::from(&mut self.footprint).cast::<T>()
        }
    }

    fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());

        if self.is_inline() {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "inline lengths are at most MODE_BYTE, which is below 0x80"
            )]
            let len_byte = len as u8;

            let mode = NonNull::from(&mut self.footprint).cast::<u8>();

            // SAFETY: The last byte lies within the footprint and no inline element reaches it.
            unsafe {
                mode.add(MODE_BYTE).write(len_byte);
            }
        } else {
            let heap = self.heap_repr();
            self.set_heap(heap.ptr, heap.capacity, len);
        }
    }

    fn truncate(&mut self, new_len: usize) {
        let len = self.len();

        if new_len >= len {
            return;
        }

        // Shorten first so a panicking destructor cannot cause a double drop.
        self.set_len(new_len);

        // SAFETY: `new_len < len`, so the offset is within the initialized range.
        let first = unsafe { self.data_mut().add(new_len) };

        // SAFETY: Slots `new_len..len` are initialized and are no longer part of the container.
        unsafe {
            destroy_n(first, len.wrapping_sub(new_len));
        }
    }

    /// Drops all elements and returns any heap block to the allocator, leaving the container
    /// empty and inline.
    fn release(&mut self) {
        self.clear();

        if self.is_inline() {
            return;
        }

        let block = self.heap_repr();
        self.footprint = Footprint::EMPTY;

        // SAFETY: The block was obtained from our allocator with exactly this layout and no
        // longer holds any live elements.
        unsafe {
            self.allocator
                .deallocate(block.ptr.cast(), array_layout::<T>(block.capacity));
        }
    }

    fn grow(&mut self, requested: usize) {
        if let Err(error) = self.try_grow(requested) {
            fail_reserve(error);
        }
    }

    fn try_grow(&mut self, requested: usize) -> Result<(), ReserveError> {
        if requested > MAX_CAPACITY {
            return Err(ReserveError::CapacityOverflow { requested });
        }

        let new_capacity = requested.next_power_of_two();
        debug_assert!(new_capacity > self.capacity());

        let Ok(new_layout) = Layout::array::<T>(new_capacity) else {
            return Err(ReserveError::CapacityOverflow { requested });
        };

        let len = self.len();
        let was_inline = self.is_inline();

        if !was_inline && is_trivially_relocatable::<T>() {
            let old = self.heap_repr();

            // SAFETY: The block came from our allocator with the layout of its capacity.
            let ptr = unsafe {
                self.allocator.try_reallocate(
                    old.ptr.cast(),
                    array_layout::<T>(old.capacity),
                    new_layout,
                )?
            };

            self.set_heap(ptr.cast(), new_capacity, len);

            trace!(len, old_capacity = old.capacity, new_capacity, "SmallVec heap block resized");
            return Ok(());
        }

        let new_ptr = self.allocator.try_allocate(new_layout)?.cast::<T>();
        let old_data = self.data_mut();

        // SAFETY: The old storage holds `len` initialized elements, the new block has room for
        // `new_capacity > len` elements and a fresh block cannot overlap existing storage.
        unsafe {
            relocate_n(new_ptr, old_data, len);
        }

        if !was_inline {
            let old = self.heap_repr();

            // SAFETY: The elements were relocated out; the block came from our allocator with
            // the layout of its capacity.
            unsafe {
                self.allocator
                    .deallocate(old.ptr.cast(), array_layout::<T>(old.capacity));
            }
        }

        self.set_heap(new_ptr, new_capacity, len);

        if was_inline {
            trace!(len, new_capacity, "SmallVec moved from inline storage to the heap");
        }

        Ok(())
    }
}

impl<T, A: Allocator> Drop for SmallVec<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, A: Allocator> Deref for SmallVec<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: Allocator> DerefMut for SmallVec<T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for SmallVec<T, A> {
    fn clone(&self) -> Self {
        Self::from_slice_in(self, self.allocator.clone())
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for SmallVec<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, A: Allocator + Default> Default for SmallVec<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T: PartialEq, A: Allocator> PartialEq for SmallVec<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, A: Allocator> Eq for SmallVec<T, A> {}

impl<T: Hash, A: Allocator> Hash for SmallVec<T, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl<T, A: Allocator> Extend<T> for SmallVec<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();

        self.reserve(self.len().saturating_add(lower));

        for item in iter {
            self.push(item);
        }
    }
}

impl<T> FromIterator<T> for SmallVec<T, Global> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut result = Self::new();
        result.extend(iter);
        result
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a SmallVec<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a mut SmallVec<T, A> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::hash_map::DefaultHasher;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{AllocError, CountingAllocator};

    assert_impl_all!(SmallVec<u32>: Send, Sync, Clone, Default, fmt::Debug);
    assert_impl_all!(SmallVec<String, CountingAllocator>: Send, Sync);
    assert_not_impl_any!(SmallVec<Rc<u32>>: Send, Sync);
    assert_not_impl_any!(SmallVec<RefCell<u32>>: Sync);

    #[derive(Clone, Copy)]
    struct Big {
        _data: [u64; 8],
    }

    #[repr(align(64))]
    struct OverAligned(u8);

    /// Test helper that counts how many of its values have been dropped.
    #[derive(Debug)]
    struct DropCounter {
        drops: Rc<Cell<usize>>,
        value: usize,
    }

    impl DropCounter {
        fn new(drops: &Rc<Cell<usize>>, value: usize) -> Self {
            Self {
                drops: Rc::clone(drops),
                value,
            }
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    /// Allocator that is never interchangeable with any other instance, including itself.
    #[derive(Clone, Debug, Default)]
    struct IncompatibleAllocator;

    impl PartialEq for IncompatibleAllocator {
        fn eq(&self, _other: &Self) -> bool {
            false
        }
    }

    impl Allocator for IncompatibleAllocator {
        fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            Global.try_allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            unsafe { Global.deallocate(ptr, layout) };
        }
    }

    /// Allocator that always fails.
    #[derive(Clone, Debug, Default, PartialEq)]
    struct FailingAllocator;

    impl Allocator for FailingAllocator {
        fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            Err(AllocError::new(layout))
        }

        unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
            panic!("nothing was ever allocated");
        }
    }

    #[test]
    fn inline_capacity_depends_on_element_size() {
        let usable = 3 * mem::size_of::<usize>() - 1;

        assert_eq!(SmallVec::<u8>::INLINE_CAPACITY, usable);
        assert_eq!(SmallVec::<u16>::INLINE_CAPACITY, usable / 2);
        assert_eq!(SmallVec::<u32>::INLINE_CAPACITY, usable / 4);
        assert_eq!(SmallVec::<u64>::INLINE_CAPACITY, usable / 8);
        assert_eq!(SmallVec::<Big>::INLINE_CAPACITY, 0);
        assert_eq!(SmallVec::<OverAligned>::INLINE_CAPACITY, 0);
        assert_eq!(SmallVec::<()>::INLINE_CAPACITY, usable);
    }

    #[test]
    fn starts_empty_and_inline() {
        let items = SmallVec::<u32>::new();

        assert_eq!(items.len(), 0);
        assert!(items.is_empty());
        assert!(items.is_inline());
        assert_eq!(items.capacity(), SmallVec::<u32>::INLINE_CAPACITY);

        let start = (&raw const items).addr();
        let data = items.as_ptr().addr();
        assert!(data >= start && data < start + mem::size_of_val(&items));
    }

    #[test]
    fn zero_inline_capacity_starts_without_storage() {
        let items = SmallVec::<Big>::new();

        assert_eq!(items.capacity(), 0);
        assert!(items.is_inline());
        assert!(items.as_slice().is_empty());
    }

    #[test]
    fn push_keeps_every_value() {
        let mut items = SmallVec::<u64>::new();

        for i in 0..1000_u64 {
            let pushed = items.push(i * 3);
            assert_eq!(*pushed, i * 3);
        }

        assert_eq!(items.len(), 1000);
        for i in 0..1000 {
            assert_eq!(items[i], i as u64 * 3);
        }
    }

    #[test]
    fn first_allocation_happens_right_after_inline_capacity() {
        let allocator = CountingAllocator::new();
        let mut items = SmallVec::<u32, _>::new_in(allocator.clone());
        let inline = SmallVec::<u32, CountingAllocator>::INLINE_CAPACITY;

        for i in 0..inline {
            items.push(i as u32);
            assert!(items.is_inline());
            assert_eq!(allocator.counts().allocations, 0);
        }

        items.push(99);
        assert!(!items.is_inline());
        assert_eq!(allocator.counts().allocations, 1);
        assert_eq!(items.capacity(), (inline + 1).next_power_of_two());

        for i in 0..inline {
            assert_eq!(items[i], i as u32);
        }
        assert_eq!(items[inline], 99);
    }

    #[test]
    fn reserve_rounds_to_power_of_two_and_counts_allocations() {
        let allocator = CountingAllocator::new();
        let mut items = SmallVec::<u32, _>::new_in(allocator.clone());

        items.reserve(SmallVec::<u32, CountingAllocator>::INLINE_CAPACITY);
        assert!(items.is_inline());
        assert_eq!(allocator.counts().allocations, 0);

        items.reserve(12);
        assert_eq!(items.capacity(), 16);
        assert_eq!(allocator.counts().allocations, 1);

        items.reserve(13);
        assert_eq!(items.capacity(), 16);
        assert_eq!(allocator.counts().allocations, 1);

        items.reserve(130);
        assert_eq!(items.capacity(), 256);
        assert_eq!(allocator.counts().allocations, 1);
        assert_eq!(allocator.counts().reallocations, 1);
    }

    #[test]
    fn reserve_never_shrinks_and_preserves_elements() {
        let mut items = SmallVec::<String>::new();
        for i in 0..20 {
            items.push(i.to_string());
        }

        let capacity = items.capacity();
        items.reserve(3);
        assert_eq!(items.capacity(), capacity);

        items.reserve(1000);
        assert!(items.capacity() >= 1000);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(*item, i.to_string());
        }
    }

    #[test]
    #[should_panic]
    fn reserve_above_maximum_panics() {
        let mut items = SmallVec::<u8>::new();
        items.reserve(SmallVec::<u8>::MAX_CAPACITY + 1);
    }

    #[test]
    fn try_reserve_reports_overflow() {
        let mut items = SmallVec::<u8>::new();

        let result = items.try_reserve(SmallVec::<u8>::MAX_CAPACITY + 1);

        assert_eq!(
            result,
            Err(ReserveError::CapacityOverflow {
                requested: SmallVec::<u8>::MAX_CAPACITY + 1
            })
        );
        assert!(items.is_inline());
    }

    #[test]
    fn try_reserve_reports_layout_overflow() {
        let mut items = SmallVec::<Big>::new();

        let result = items.try_reserve(SmallVec::<Big>::MAX_CAPACITY);

        assert!(matches!(result, Err(ReserveError::CapacityOverflow { .. })));
    }

    #[test]
    fn try_reserve_reports_allocation_failure() {
        let mut items = SmallVec::<u64, _>::new_in(FailingAllocator);
        items.push(1);

        let result = items.try_reserve(100);

        assert!(matches!(result, Err(ReserveError::AllocFailed(_))));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], 1);
        assert!(items.is_inline());
    }

    #[test]
    fn try_reserve_succeeds_within_limits() {
        let mut items = SmallVec::<u64>::new();

        items.try_reserve(33).unwrap();

        assert_eq!(items.capacity(), 64);
    }

    #[test]
    fn clear_drops_elements_and_keeps_capacity() {
        let drops = Rc::new(Cell::new(0));
        let mut items = SmallVec::<DropCounter>::new();

        for i in 0..10 {
            items.push(DropCounter::new(&drops, i));
        }
        let capacity = items.capacity();

        items.clear();

        assert_eq!(drops.get(), 10);
        assert!(items.is_empty());
        assert!(!items.is_inline());
        assert_eq!(items.capacity(), capacity);
    }

    #[test]
    fn drop_releases_elements_and_block() {
        let drops = Rc::new(Cell::new(0));
        let allocator = CountingAllocator::new();

        {
            let mut items = SmallVec::new_in(allocator.clone());
            for i in 0..50 {
                items.push(DropCounter::new(&drops, i));
            }
            assert!(allocator.counts().live_bytes > 0);
        }

        assert_eq!(drops.get(), 50);
        assert_eq!(allocator.counts().live_bytes, 0);
        assert_eq!(allocator.counts().deallocations, 1);
    }

    #[test]
    fn growth_relocates_without_dropping() {
        let drops = Rc::new(Cell::new(0));
        let mut items = SmallVec::<DropCounter>::new();

        for i in 0..100 {
            items.push(DropCounter::new(&drops, i));
        }

        assert_eq!(drops.get(), 0);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.value, i);
        }
    }

    #[test]
    fn resize_uninit_shrink_drops_tail() {
        let drops = Rc::new(Cell::new(0));
        let mut items = SmallVec::<DropCounter>::new();
        for i in 0..8 {
            items.push(DropCounter::new(&drops, i));
        }

        unsafe { items.resize_uninit(3) };

        assert_eq!(items.len(), 3);
        assert_eq!(drops.get(), 5);
        assert_eq!(items[2].value, 2);
    }

    #[test]
    fn resize_uninit_grow_leaves_slots_for_caller() {
        let mut items = SmallVec::<u16>::new();
        items.push(7);

        unsafe {
            items.resize_uninit(40);
            let data = items.as_mut_ptr();
            for i in 1..40 {
                data.add(i).write(i as u16);
            }
        }

        assert_eq!(items.len(), 40);
        assert!(items.capacity() >= 40);
        assert_eq!(items[0], 7);
        assert_eq!(items[39], 39);
    }

    #[test]
    fn resize_fills_and_truncates() {
        let mut items = SmallVec::<String>::new();

        items.resize(5, "x".to_string());
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|s| s == "x"));

        let mut next = 0;
        items.resize_with(8, || {
            next += 1;
            next.to_string()
        });
        assert_eq!(&items[5..], &["1", "2", "3"]);

        items.resize(2, String::new());
        assert_eq!(&items[..], &["x", "x"]);
    }

    #[test]
    #[should_panic]
    fn index_out_of_bounds_panics() {
        let mut items = SmallVec::<u32>::new();
        items.push(1);

        let _value = items[1];
    }

    #[test]
    fn take_transfers_heap_block_in_constant_time() {
        let mut source = SmallVec::<u64>::new();
        for i in 0..100 {
            source.push(i);
        }
        let address = source.as_ptr();

        let destination = source.take();

        assert_eq!(destination.as_ptr(), address);
        assert_eq!(destination.len(), 100);
        assert_eq!(destination[99], 99);
        assert!(source.is_empty());
        assert!(source.is_inline());
    }

    /// Allocator whose clones are separate arenas that cannot release each other's blocks.
    #[derive(Debug, Default, PartialEq)]
    struct ArenaAllocator {
        arena: CountingAllocator,
    }

    impl Clone for ArenaAllocator {
        fn clone(&self) -> Self {
            Self::default()
        }
    }

    impl Allocator for ArenaAllocator {
        fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            self.arena.try_allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            unsafe { self.arena.deallocate(ptr, layout) };
        }
    }

    #[test]
    fn take_relocates_when_cloned_allocator_is_not_interchangeable() {
        let mut source = SmallVec::<u64, _>::new_in(ArenaAllocator::default());
        for i in 0..100 {
            source.push(i);
        }
        let source_arena = source.allocator().arena.clone();
        let source_address = source.as_ptr();

        let destination = source.take();
        let destination_arena = destination.allocator().arena.clone();

        assert_ne!(destination.allocator(), source.allocator());
        assert_ne!(destination.as_ptr(), source_address);
        assert_eq!(destination.len(), 100);
        assert_eq!(destination[99], 99);
        assert!(source.is_empty());
        assert!(source.is_inline());

        // Each arena only ever releases its own blocks.
        assert_eq!(source_arena.counts().live_bytes, 0);
        assert_eq!(
            source_arena.counts().allocations,
            source_arena.counts().deallocations
        );
        assert_eq!(destination_arena.counts().allocations, 1);
        assert_eq!(destination_arena.counts().deallocations, 0);

        drop(destination);
        drop(source);
        assert_eq!(destination_arena.counts().live_bytes, 0);
        assert_eq!(destination_arena.counts().deallocations, 1);
        assert_eq!(source_arena.counts().live_bytes, 0);
    }

    #[test]
    fn take_relocates_inline_elements() {
        let drops = Rc::new(Cell::new(0));
        let mut source = SmallVec::<DropCounter>::new();
        let inline = SmallVec::<DropCounter>::INLINE_CAPACITY;
        for i in 0..inline {
            source.push(DropCounter::new(&drops, i));
        }

        let destination = source.take();

        assert_eq!(drops.get(), 0);
        assert!(destination.is_inline());
        assert_eq!(destination.len(), inline);
        assert!(source.is_empty());

        drop(source);
        assert_eq!(drops.get(), 0);
        drop(destination);
        assert_eq!(drops.get(), inline);
    }

    #[test]
    fn move_from_adopts_block_with_equal_allocators() {
        let allocator = CountingAllocator::new();
        let mut source = SmallVec::<u32, _>::new_in(allocator.clone());
        for i in 0..64 {
            source.push(i);
        }
        let mut destination = SmallVec::<u32, _>::new_in(allocator.clone());
        for i in 0..32 {
            destination.push(i + 1000);
        }
        let address = source.as_ptr();

        destination.move_from(&mut source);

        assert_eq!(destination.as_ptr(), address);
        assert_eq!(destination.len(), 64);
        assert_eq!(destination[63], 63);
        assert!(source.is_empty());
        assert!(source.is_inline());

        drop(destination);
        drop(source);
        assert_eq!(allocator.counts().live_bytes, 0);
    }

    #[test]
    fn move_from_relocates_with_incompatible_allocators() {
        let drops = Rc::new(Cell::new(0));
        let mut source = SmallVec::new_in(IncompatibleAllocator);
        for i in 0..20 {
            source.push(DropCounter::new(&drops, i));
        }
        let mut destination = SmallVec::new_in(IncompatibleAllocator);
        destination.push(DropCounter::new(&drops, 500));
        let address = source.as_ptr();

        destination.move_from(&mut source);

        assert_ne!(destination.as_ptr(), address);
        assert_eq!(drops.get(), 1);
        assert_eq!(destination.len(), 20);
        for (i, item) in destination.iter().enumerate() {
            assert_eq!(item.value, i);
        }
        assert!(source.is_empty());
        assert!(source.is_inline());

        drop(destination);
        assert_eq!(drops.get(), 21);
    }

    #[test]
    fn move_from_inline_source_releases_destination_block() {
        let allocator = CountingAllocator::new();
        let mut source = SmallVec::<u8, _>::new_in(allocator.clone());
        source.push(1);
        source.push(2);
        let mut destination = SmallVec::<u8, _>::new_in(allocator.clone());
        destination.resize(100, 0);
        assert!(!destination.is_inline());

        destination.move_from(&mut source);

        assert!(destination.is_inline());
        assert_eq!(&destination[..], &[1, 2]);
        assert!(source.is_empty());
        assert_eq!(allocator.counts().live_bytes, 0);
    }

    #[test]
    fn clone_is_independent() {
        let mut original = SmallVec::<String>::from_slice(&["a".to_string(), "b".to_string()]);
        let copy = original.clone();

        original[0].push('!');

        assert_eq!(&copy[..], &["a", "b"]);
        assert_eq!(&original[..], &["a!", "b"]);
    }

    #[test]
    fn equal_contents_hash_equal() {
        let a: SmallVec<u32> = (0..10).collect();
        let mut b = SmallVec::<u32>::with_capacity_in(64, Global);
        b.extend(0..10);

        let hash = |items: &SmallVec<u32>| {
            let mut hasher = DefaultHasher::new();
            items.hash(&mut hasher);
            hasher.finish()
        };

        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
        assert_eq!(format!("{a:?}"), format!("{:?}", (0..10).collect::<Vec<_>>()));
    }

    #[test]
    fn zero_sized_elements_take_no_memory() {
        let allocator = CountingAllocator::new();
        let mut items = SmallVec::<(), _>::new_in(allocator.clone());

        for _ in 0..SmallVec::<(), CountingAllocator>::INLINE_CAPACITY {
            items.push(());
        }
        assert!(items.is_inline());

        for _ in 0..10_000 {
            items.push(());
        }

        assert_eq!(items.len(), 10_000 + SmallVec::<(), CountingAllocator>::INLINE_CAPACITY);
        assert!(!items.is_inline());
        assert_eq!(allocator.counts().live_bytes, 0);

        drop(items);
        assert_eq!(allocator.counts().live_bytes, 0);
    }

    #[test]
    fn over_aligned_elements_live_on_heap() {
        let mut items = SmallVec::<OverAligned>::new();

        for i in 0..10 {
            items.push(OverAligned(i));
        }

        assert!(!items.is_inline());
        assert_eq!(items.as_ptr() as usize % 64, 0);
        assert_eq!(items[9].0, 9);
    }

    #[test]
    fn iterates_mutably() {
        let mut items: SmallVec<u32> = (1..=6).collect();

        for item in &mut items {
            *item *= 10;
        }

        let collected: Vec<u32> = (&items).into_iter().copied().collect();
        assert_eq!(collected, vec![10, 20, 30, 40, 50, 60]);
    }
}
