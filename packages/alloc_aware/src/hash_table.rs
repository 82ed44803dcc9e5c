use std::alloc::Layout;
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use tracing::trace;

use crate::{
    Allocator, DefaultKeyComparator, DefaultKeyHasher, Global, HashTableBuilder,
    KeyComparator, KeyHasher, ReserveError, array_layout, relocate_n,
};
use crate::error::fail_reserve;

/// Tag of a slot that has never held a value since the last rehash or clear.
const EMPTY: u8 = 0;

/// Tag of a slot whose value was removed. Lookups probe past it; inserts may reuse it.
const TOMBSTONE: u8 = 1;

/// High bit set on the tag of every occupied slot. The low 7 bits hold a fragment of the hash.
const OCCUPIED: u8 = 0x80;

/// Mask selecting the bits of the hash that become the tag fragment.
const TAG_HASH_MASK: u64 = 0x7f;

/// Number of low hash bits used for the tag; the starting slot is taken from the bits above.
const TAG_HASH_BITS: u32 = 7;

/// Smallest non-zero capacity.
const MIN_CAPACITY: usize = 8;

/// Splits a hash into the tag of its slot and the index probing starts from. The two use
/// disjoint bits of the hash.
#[expect(
    clippy::cast_possible_truncation,
    reason = "dropping high bits is the intent on 32-bit targets"
)]
fn split_hash(hash: u64, capacity: usize) -> (u8, usize) {
    debug_assert!(capacity.is_power_of_two());

    let tag = (hash & TAG_HASH_MASK) as u8 | OCCUPIED;
    let start = (hash >> TAG_HASH_BITS) as usize & capacity.wrapping_sub(1);

    (tag, start)
}

/// Largest number of values a table of `capacity` slots may hold: 75% of the slots.
#[expect(clippy::integer_division, reason = "capacity is a power of two")]
fn max_len(capacity: usize) -> usize {
    // Cannot overflow: both halves are strictly smaller than `capacity`.
    (capacity / 2).wrapping_add(capacity / 4)
}

/// Smallest valid capacity that holds `len` values within the load limit, or `None` if it
/// cannot be represented.
#[expect(clippy::integer_division, reason = "rounding is compensated by the + 2")]
fn capacity_for(len: usize) -> Option<usize> {
    let slots = len.checked_mul(4)?.checked_add(2)? / 3;

    Some(slots.checked_next_power_of_two()?.max(MIN_CAPACITY))
}

#[inline]
fn is_occupied(tag: u8) -> bool {
    tag & OCCUPIED != 0
}

/// Returns the first slot at or after `start` (wrapping) that is empty or a tombstone.
///
/// # Safety
///
/// `tags` must point to `capacity` initialized tags, `capacity` must be a power of two and at
/// least one slot must be free.
unsafe fn first_free(tags: NonNull<u8>, capacity: usize, start: usize) -> usize {
    let mask = capacity.wrapping_sub(1);
    let mut index = start;

    loop {
        // SAFETY: `index` is masked into `0..capacity`, within the caller's tag array.
        let tag = unsafe { tags.add(index).read() };

        if !is_occupied(tag) {
            return index;
        }

        index = index.wrapping_add(1) & mask;
    }
}

/// An open-addressing hash set with byte tags, generic over its allocator, hasher and
/// comparator.
///
/// Values live in a flat array of slots next to a parallel array of one-byte tags. A tag is
/// [empty][EMPTY], a [tombstone][TOMBSTONE] left by a removal, or [occupied][OCCUPIED] with 7
/// bits of the value's hash, which lets most probes reject a slot without comparing values.
/// Collisions are resolved by linear probing.
///
/// At most 75% of the slots are occupied. Capacity is zero or a power of two of at least 8, and
/// doubles whenever an insert finds the table at its load limit. Removing values never shrinks
/// the table.
///
/// Lookups accept any key type `Q` for which the hasher implements [`KeyHasher<Q>`] and the
/// comparator implements [`KeyComparator<T, Q>`]. With the defaults that means anything `T`
/// can be [borrowed][std::borrow::Borrow] as, such as `&str` for a table of `String`.
///
/// # Examples
///
/// ```
/// use alloc_aware::HashTable;
///
/// let mut names = HashTable::<String>::new();
///
/// assert!(names.insert("alice".to_string()).is_none());
/// assert!(names.insert("bob".to_string()).is_none());
/// assert!(names.insert("alice".to_string()).is_some());
///
/// assert_eq!(names.len(), 2);
/// assert!(names.contains("alice"));
/// assert!(names.remove("alice"));
/// assert!(!names.contains("alice"));
/// ```
pub struct HashTable<T, A = Global, H = DefaultKeyHasher, C = DefaultKeyComparator>
where
    A: Allocator,
{
    /// `capacity` tags, or dangling if the capacity is zero.
    tags: NonNull<u8>,

    /// `capacity` value slots, initialized exactly where the tag is occupied.
    values: NonNull<T>,

    capacity: usize,
    len: usize,

    allocator: A,
    hasher: H,
    comparator: C,

    _owns: PhantomData<T>,
}

// SAFETY: The table exclusively owns its values and its collaborators; sending it sends them.
unsafe impl<T, A, H, C> Send for HashTable<T, A, H, C>
where
    T: Send,
    A: Allocator + Send,
    H: Send,
    C: Send,
{
}

// SAFETY: Shared access only hands out shared references to values and collaborators.
unsafe impl<T, A, H, C> Sync for HashTable<T, A, H, C>
where
    T: Sync,
    A: Allocator + Sync,
    H: Sync,
    C: Sync,
{
}

/// Outcome of probing for an insert position.
enum Probe {
    /// An equal value lives in this slot.
    Present(usize),

    /// No equal value exists; this is the first free slot of the probe sequence.
    Vacant(usize),
}

impl<T> HashTable<T> {
    /// Creates an empty table with the default allocator, hasher and comparator.
    ///
    /// Does not allocate until the first insert.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(Global)
    }

    /// Starts building a table with a custom allocator, hasher, comparator or initial capacity.
    pub fn builder() -> HashTableBuilder<T> {
        HashTableBuilder::new()
    }
}

impl<T, A: Allocator> HashTable<T, A> {
    /// Creates an empty table that will obtain its arrays from `allocator`.
    #[must_use]
    pub fn new_in(allocator: A) -> Self {
        Self::from_parts(0, allocator, DefaultKeyHasher::default(), DefaultKeyComparator)
    }

    /// Creates an empty table with room for at least `len` values before it needs to grow.
    #[must_use]
    pub fn with_capacity_in(len: usize, allocator: A) -> Self {
        Self::from_parts(len, allocator, DefaultKeyHasher::default(), DefaultKeyComparator)
    }
}

impl<T, A: Allocator, H, C> HashTable<T, A, H, C> {
    pub(crate) fn from_parts(len: usize, allocator: A, hasher: H, comparator: C) -> Self {
        let mut table = Self {
            tags: NonNull::dangling(),
            values: NonNull::dangling(),
            capacity: 0,
            len: 0,
            allocator,
            hasher,
            comparator,
            _owns: PhantomData,
        };

        if len > 0 {
            let Some(capacity) = capacity_for(len) else {
                fail_reserve(ReserveError::CapacityOverflow { requested: len });
            };

            let (tags, values) = match allocate_arrays::<T, A>(&table.allocator, capacity) {
                Ok(arrays) => arrays,
                Err(error) => fail_reserve(error),
            };

            table.tags = tags;
            table.values = values;
            table.capacity = capacity;
        }

        table
    }

    /// Returns the number of values in the table.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the table holds no values.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots. At most 75% of them can be occupied.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the allocator that provides the table's arrays.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Returns the hasher.
    #[must_use]
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Returns the comparator.
    #[must_use]
    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Returns an iterator over the values, in slot order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            tags: self.tags,
            values: self.values,
            index: 0,
            capacity: self.capacity,
            remaining: self.len,
            _borrows: PhantomData,
        }
    }

    /// Returns `true` if a value equal to `key` is in the table.
    #[must_use]
    pub fn contains<Q: ?Sized>(&self, key: &Q) -> bool
    where
        H: KeyHasher<Q>,
        C: KeyComparator<T, Q>,
    {
        self.find(key).is_some()
    }

    /// Returns the value equal to `key`, if any.
    #[must_use]
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<&T>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<T, Q>,
    {
        let index = self.find(key)?;

        // SAFETY: `find()` only returns occupied slots.
        Some(unsafe { self.value(index).as_ref() })
    }

    /// Returns the value equal to `key` for modification, if any.
    ///
    /// The modification must not change the value's hash or how it compares to other values.
    /// Doing so does not cause undefined behavior but leaves the value unreachable by lookups.
    #[must_use]
    pub fn get_mut<Q: ?Sized>(&mut self, key: &Q) -> Option<&mut T>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<T, Q>,
    {
        let index = self.find(key)?;

        // SAFETY: `find()` only returns occupied slots and we hold an exclusive borrow.
        Some(unsafe { self.value(index).as_mut() })
    }

    /// Removes and drops the value equal to `key`. Returns `false` if there was none.
    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> bool
    where
        H: KeyHasher<Q>,
        C: KeyComparator<T, Q>,
    {
        let Some(index) = self.find(key) else {
            return false;
        };

        self.vacate(index);

        // SAFETY: The slot was occupied until `vacate()` marked it; the value is still there
        // and nothing else will read or drop it.
        unsafe {
            self.value(index).drop_in_place();
        }

        true
    }

    /// Removes the value equal to `key` and returns it.
    pub fn take<Q: ?Sized>(&mut self, key: &Q) -> Option<T>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<T, Q>,
    {
        let index = self.find(key)?;

        self.vacate(index);

        // SAFETY: As in `remove()`; ownership moves to the caller instead of being dropped.
        Some(unsafe { self.value(index).read() })
    }

    /// Drops every value. The capacity is kept and every slot becomes empty, which also
    /// discards any tombstones.
    pub fn clear(&mut self) {
        let len = self.len;

        for index in 0..self.capacity {
            let tag = self.tag(index);
            self.set_tag(index, EMPTY);

            if !is_occupied(tag) {
                continue;
            }

            // Forget each value before dropping it. If a destructor panics, the length still
            // matches the slots that remain occupied.
            self.len = self.len.wrapping_sub(1);

            if mem::needs_drop::<T>() {
                // SAFETY: The slot was occupied and its tag no longer says so.
                unsafe {
                    self.value(index).drop_in_place();
                }
            }
        }

        trace!(dropped = len, capacity = self.capacity, "hash table cleared");
    }

    /// Inserts `value`, returning the equal value it replaced, if any.
    ///
    /// If an equal value is already present it is overwritten in place and the size does not
    /// change. Grows the table first if it is at its load limit.
    pub fn insert(&mut self, value: T) -> Option<T>
    where
        H: KeyHasher<T>,
        C: KeyComparator<T>,
    {
        self.insert_or_update(value, mem::replace)
    }

    /// Inserts `value` if no equal value is present. Otherwise hands the stored value and
    /// `value` to `update` and returns its result.
    pub(crate) fn insert_or_update<R>(
        &mut self,
        value: T,
        update: impl FnOnce(&mut T, T) -> R,
    ) -> Option<R>
    where
        H: KeyHasher<T>,
        C: KeyComparator<T>,
    {
        if self.len >= max_len(self.capacity) {
            self.grow();
        }

        let hash = self.hasher.hash(&value);
        let (tag, start) = split_hash(hash, self.capacity);

        match self.probe_for_insert(tag, start, &value) {
            Probe::Present(index) => {
                // SAFETY: `Present` slots are occupied and we hold an exclusive borrow.
                let existing = unsafe { self.value(index).as_mut() };

                Some(update(existing, value))
            }
            Probe::Vacant(index) => {
                self.occupy(index, tag, value);
                None
            }
        }
    }

    /// Ensures the table can hold at least `len` values in total without growing.
    ///
    /// # Panics
    ///
    /// Panics if the required capacity cannot be represented. Allocation failure terminates
    /// the process.
    pub fn reserve(&mut self, len: usize)
    where
        H: KeyHasher<T>,
    {
        if let Err(error) = self.try_reserve(len) {
            fail_reserve(error);
        }
    }

    /// Fallible version of [`reserve()`][Self::reserve].
    ///
    /// # Errors
    ///
    /// Returns [`ReserveError::CapacityOverflow`] if the capacity cannot be represented and
    /// [`ReserveError::AllocFailed`] if the allocator cannot provide the arrays. The table is
    /// unchanged in both cases.
    pub fn try_reserve(&mut self, len: usize) -> Result<(), ReserveError>
    where
        H: KeyHasher<T>,
    {
        let Some(capacity) = capacity_for(len) else {
            return Err(ReserveError::CapacityOverflow { requested: len });
        };

        if capacity <= self.capacity {
            return Ok(());
        }

        self.try_rehash(capacity)
    }

    fn find<Q: ?Sized>(&self, key: &Q) -> Option<usize>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<T, Q>,
    {
        if self.capacity == 0 {
            return None;
        }

        let (tag, start) = split_hash(self.hasher.hash(key), self.capacity);
        let mask = self.capacity.wrapping_sub(1);
        let mut index = start;

        for _ in 0..self.capacity {
            let slot_tag = self.tag(index);

            if slot_tag == EMPTY {
                return None;
            }

            // Tombstones never match a tag and do not end the probe sequence.
            if slot_tag == tag {
                // SAFETY: The tag says the slot is occupied.
                let candidate = unsafe { self.value(index).as_ref() };

                if self.comparator.eq(candidate, key) {
                    return Some(index);
                }
            }

            index = index.wrapping_add(1) & mask;
        }

        None
    }

    fn probe_for_insert(&self, tag: u8, start: usize, value: &T) -> Probe
    where
        C: KeyComparator<T>,
    {
        let mask = self.capacity.wrapping_sub(1);
        let mut index = start;
        let mut first_free = None;

        for _ in 0..self.capacity {
            match self.tag(index) {
                EMPTY => return Probe::Vacant(first_free.unwrap_or(index)),
                TOMBSTONE => {
                    first_free.get_or_insert(index);
                }
                slot_tag if slot_tag == tag => {
                    // SAFETY: The tag says the slot is occupied.
                    let candidate = unsafe { self.value(index).as_ref() };

                    if self.comparator.eq(candidate, value) {
                        return Probe::Present(index);
                    }
                }
                _ => {}
            }

            index = index.wrapping_add(1) & mask;
        }

        // A full cycle without an empty slot: the load limit guarantees a tombstone was seen.
        let Some(index) = first_free else {
            panic!(
                "hash table with {} of {} slots occupied has no free slot",
                self.len, self.capacity
            );
        };

        Probe::Vacant(index)
    }

    /// Writes `value` into the free slot `index` and marks it occupied.
    fn occupy(&mut self, index: usize, tag: u8, value: T) {
        debug_assert!(!is_occupied(self.tag(index)));

        // SAFETY: The slot is free, so it holds no value that would be overwritten.
        unsafe {
            self.value(index).write(value);
        }

        self.set_tag(index, tag);

        // Cannot overflow: the length is bounded by the capacity.
        self.len = self.len.wrapping_add(1);
    }

    /// Marks the occupied slot `index` as a tombstone. The caller takes over the value.
    fn vacate(&mut self, index: usize) {
        debug_assert!(is_occupied(self.tag(index)));

        self.set_tag(index, TOMBSTONE);

        // Cannot underflow: an occupied slot was counted.
        self.len = self.len.wrapping_sub(1);
    }

    fn grow(&mut self)
    where
        H: KeyHasher<T>,
    {
        let new_capacity = if self.capacity == 0 {
            MIN_CAPACITY
        } else {
            let Some(doubled) = self.capacity.checked_mul(2) else {
                panic!("hash table capacity {} cannot be doubled", self.capacity);
            };

            doubled
        };

        if let Err(error) = self.try_rehash(new_capacity) {
            fail_reserve(error);
        }
    }

    /// Moves every value into new arrays of `new_capacity` slots.
    ///
    /// The old arrays stay authoritative until every value has been placed: if the hasher
    /// panics, the new arrays are released and the table is left as it was.
    fn try_rehash(&mut self, new_capacity: usize) -> Result<(), ReserveError>
    where
        H: KeyHasher<T>,
    {
        debug_assert!(new_capacity.is_power_of_two());
        debug_assert!(max_len(new_capacity) >= self.len);

        let (new_tags, new_values) = allocate_arrays::<T, A>(&self.allocator, new_capacity)?;

        let new_arrays = scopeguard::guard((new_tags, new_values), |(tags, values)| {
            // SAFETY: Both arrays were allocated just above with these layouts. They only hold
            // bitwise copies of values still owned by the old arrays, so nothing is dropped.
            unsafe {
                free_arrays::<T, A>(&self.allocator, tags, values, new_capacity);
            }
        });

        for index in 0..self.capacity {
            let tag = self.tag(index);

            if !is_occupied(tag) {
                continue;
            }

            // SAFETY: `index` is below the capacity.
            let value = unsafe { self.value(index) };

            // SAFETY: The tag says the slot is occupied.
            let hash = self.hasher.hash(unsafe { value.as_ref() });
            let (new_tag, start) = split_hash(hash, new_capacity);

            // SAFETY: The new tag array is initialized and has free slots because it is sized
            // for more than the current length.
            let new_index = unsafe { first_free(new_tags, new_capacity, start) };

            // SAFETY: `new_index` is within the new arrays and the slot is free.
            unsafe {
                new_tags.add(new_index).write(new_tag);
            }

            // SAFETY: `new_index` is within the new value array.
            let destination = unsafe { new_values.add(new_index) };

            // SAFETY: Distinct allocations cannot overlap; the source is initialized and the
            // destination slot is free. The old slot stays tagged occupied until the arrays
            // are swapped, which only happens once every value has been placed.
            unsafe {
                relocate_n(destination, value, 1);
            }
        }

        // Every value has been placed. From here on the new arrays own them.
        let (new_tags, new_values) = scopeguard::ScopeGuard::into_inner(new_arrays);

        let old_capacity = self.capacity;

        if old_capacity > 0 {
            // SAFETY: The old arrays were allocated with these layouts and every value in them
            // has been moved out, so releasing the memory without dropping is correct.
            unsafe {
                free_arrays::<T, A>(&self.allocator, self.tags, self.values, old_capacity);
            }
        }

        self.tags = new_tags;
        self.values = new_values;
        self.capacity = new_capacity;

        trace!(len = self.len, old_capacity, new_capacity, "hash table rehashed");

        Ok(())
    }

    #[inline]
    fn tag(&self, index: usize) -> u8 {
        debug_assert!(index < self.capacity);

        // SAFETY: Callers only pass indexes below the capacity and all tags are initialized.
        unsafe { self.tags.add(index).read() }
    }

    #[inline]
    fn set_tag(&mut self, index: usize, tag: u8) {
        debug_assert!(index < self.capacity);

        // SAFETY: Callers only pass indexes below the capacity.
        unsafe {
            self.tags.add(index).write(tag);
        }
    }

    /// Returns a pointer to the value slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be below the capacity.
    #[inline]
    unsafe fn value(&self, index: usize) -> NonNull<T> {
        debug_assert!(index < self.capacity);

        // SAFETY: Forwarding the caller's guarantee that the slot is within the array.
        unsafe { self.values.add(index) }
    }
}

/// Allocates a tag array with every tag empty and an uninitialized value array.
fn allocate_arrays<T, A: Allocator>(
    allocator: &A,
    capacity: usize,
) -> Result<(NonNull<u8>, NonNull<T>), ReserveError> {
    let (Ok(tags_layout), Ok(values_layout)) = (
        Layout::array::<u8>(capacity),
        Layout::array::<T>(capacity),
    ) else {
        return Err(ReserveError::CapacityOverflow {
            requested: max_len(capacity),
        });
    };

    let tags = allocator.try_allocate(tags_layout)?;

    let values = match allocator.try_allocate(values_layout) {
        Ok(values) => values,
        Err(error) => {
            // SAFETY: Allocated just above with this layout and not shared.
            unsafe {
                allocator.deallocate(tags, tags_layout);
            }

            return Err(error.into());
        }
    };

    // SAFETY: The tag array was just allocated for `capacity` bytes.
    unsafe {
        tags.write_bytes(EMPTY, capacity);
    }

    Ok((tags, values.cast::<T>()))
}

/// Releases arrays obtained from [`allocate_arrays()`] without dropping any values.
///
/// # Safety
///
/// Both arrays must have been allocated by `allocator` (or one equal to it) for `capacity`
/// slots, and must not be used afterwards.
unsafe fn free_arrays<T, A: Allocator>(
    allocator: &A,
    tags: NonNull<u8>,
    values: NonNull<T>,
    capacity: usize,
) {
    // SAFETY: Forwarding the caller's guarantees about origin and layout.
    unsafe {
        allocator.deallocate(tags, array_layout::<u8>(capacity));
    }

    // SAFETY: Forwarding the caller's guarantees about origin and layout.
    unsafe {
        allocator.deallocate(values.cast(), array_layout::<T>(capacity));
    }
}

impl<T, A: Allocator, H, C> Drop for HashTable<T, A, H, C> {
    fn drop(&mut self) {
        if self.capacity == 0 {
            return;
        }

        if mem::needs_drop::<T>() {
            for index in 0..self.capacity {
                if is_occupied(self.tag(index)) {
                    // SAFETY: The tag says the slot is occupied, and the table is going away.
                    unsafe {
                        self.value(index).drop_in_place();
                    }
                }
            }
        }

        // SAFETY: The arrays were allocated by our allocator for `capacity` slots and all
        // values have been dropped.
        unsafe {
            free_arrays::<T, A>(&self.allocator, self.tags, self.values, self.capacity);
        }
    }
}

impl<T, A, H, C> Clone for HashTable<T, A, H, C>
where
    T: Clone,
    A: Allocator + Clone,
    H: KeyHasher<T> + Clone,
    C: Clone,
{
    /// Clones every value into a fresh table sized for the current length, which also drops
    /// any tombstones.
    fn clone(&self) -> Self {
        let mut clone = Self::from_parts(
            self.len,
            self.allocator.clone(),
            self.hasher.clone(),
            self.comparator.clone(),
        );

        for value in self {
            let (tag, start) = split_hash(clone.hasher.hash(value), clone.capacity);

            // SAFETY: The clone is sized for all values, so free slots remain.
            let index = unsafe { first_free(clone.tags, clone.capacity, start) };

            // Values of `self` are distinct, so there is nothing to compare against.
            clone.occupy(index, tag, value.clone());
        }

        clone
    }
}

impl<T: fmt::Debug, A: Allocator, H, C> fmt::Debug for HashTable<T, A, H, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, A, H, C> Default for HashTable<T, A, H, C>
where
    A: Allocator + Default,
    H: Default,
    C: Default,
{
    fn default() -> Self {
        Self::from_parts(0, A::default(), H::default(), C::default())
    }
}

impl<T, A, H, C> Extend<T> for HashTable<T, A, H, C>
where
    A: Allocator,
    H: KeyHasher<T>,
    C: KeyComparator<T>,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();

        self.reserve(self.len.saturating_add(lower));

        for value in iter {
            self.insert(value);
        }
    }
}

impl<T> FromIterator<T> for HashTable<T>
where
    DefaultKeyHasher: KeyHasher<T>,
    DefaultKeyComparator: KeyComparator<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut table = Self::new();
        table.extend(iter);
        table
    }
}

impl<'a, T, A: Allocator, H, C> IntoIterator for &'a HashTable<T, A, H, C> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the values of a [`HashTable`], in slot order.
///
/// Created by [`HashTable::iter()`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    tags: NonNull<u8>,
    values: NonNull<T>,
    index: usize,
    capacity: usize,
    remaining: usize,
    _borrows: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.index < self.capacity {
            let index = self.index;
            self.index = index.wrapping_add(1);

            // SAFETY: `index` is below the capacity of the borrowed table.
            let tag = unsafe { self.tags.add(index).read() };

            if is_occupied(tag) {
                self.remaining = self.remaining.wrapping_sub(1);

                // SAFETY: The slot is occupied and the table is borrowed for `'a`.
                return Some(unsafe { self.values.add(index).as_ref() });
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self { ..*self }
    }
}

// SAFETY: The iterator only hands out shared references to the values.
unsafe impl<T: Sync> Send for Iter<'_, T> {}

// SAFETY: The iterator only hands out shared references to the values.
unsafe impl<T: Sync> Sync for Iter<'_, T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use std::hash::{Hash, Hasher};
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{AllocError, CountingAllocator};

    assert_impl_all!(HashTable<u32>: Send, Sync, Clone, Default, fmt::Debug);
    assert_not_impl_any!(HashTable<Rc<u32>>: Send, Sync);
    assert_not_impl_any!(HashTable<RefCell<u32>>: Sync);
    assert_impl_all!(Iter<'static, u32>: Send, Sync, Clone, ExactSizeIterator);

    /// Hasher that sends every value to the same slot, forcing long probe sequences.
    #[derive(Clone, Debug, Default)]
    struct CollidingHasher;

    impl<Q: ?Sized> KeyHasher<Q> for CollidingHasher {
        fn hash(&self, _value: &Q) -> u64 {
            0
        }
    }

    /// Value that records its drop in a shared set.
    #[derive(Debug)]
    struct Tracked {
        key: u32,
        dropped: Rc<RefCell<Vec<u32>>>,
    }

    impl PartialEq for Tracked {
        fn eq(&self, other: &Self) -> bool {
            self.key == other.key
        }
    }

    impl Eq for Tracked {}

    impl Hash for Tracked {
        fn hash<S: Hasher>(&self, state: &mut S) {
            self.key.hash(state);
        }
    }

    impl std::borrow::Borrow<u32> for Tracked {
        fn borrow(&self) -> &u32 {
            &self.key
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.borrow_mut().push(self.key);
        }
    }

    #[test]
    fn hash_split_uses_disjoint_bits() {
        let (tag, start) = split_hash(0b1_0101_0101, 8);

        assert_eq!(tag, 0x80 | 0b101_0101);
        assert_eq!(start, 0b10);
        assert!(is_occupied(tag));
        assert!(!is_occupied(EMPTY));
        assert!(!is_occupied(TOMBSTONE));
    }

    #[test]
    fn capacity_sizing() {
        assert_eq!(max_len(8), 6);
        assert_eq!(max_len(16), 12);
        assert_eq!(capacity_for(0), Some(8));
        assert_eq!(capacity_for(6), Some(8));
        assert_eq!(capacity_for(7), Some(16));
        assert_eq!(capacity_for(12), Some(16));
        assert_eq!(capacity_for(13), Some(32));
        assert_eq!(capacity_for(usize::MAX), None);
    }

    #[test]
    fn starts_without_storage() {
        let allocator = CountingAllocator::new();
        let table = HashTable::<u32, _>::new_in(allocator.clone());

        assert_eq!(table.capacity(), 0);
        assert!(table.is_empty());
        assert!(!table.contains(&1));
        assert_eq!(table.iter().count(), 0);
        assert_eq!(allocator.counts().allocations, 0);
    }

    #[test]
    fn first_insert_allocates_minimum_capacity() {
        let mut table = HashTable::<u32>::new();

        table.insert(5);

        assert_eq!(table.capacity(), MIN_CAPACITY);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&5));
    }

    #[test]
    fn duplicate_insert_keeps_size_and_returns_replaced() {
        let mut table = HashTable::<String>::new();

        assert_eq!(table.insert("a".to_string()), None);
        assert_eq!(table.insert("a".to_string()), Some("a".to_string()));
        assert_eq!(table.insert("a".to_string()), Some("a".to_string()));

        assert_eq!(table.len(), 1);
        assert!(table.contains("a"));
    }

    #[test]
    fn growth_doubles_when_load_limit_is_reached() {
        let mut table = HashTable::<u32>::new();

        for i in 0..6 {
            table.insert(i);
        }
        assert_eq!(table.capacity(), 8);

        table.insert(6);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.len(), 7);

        for i in 0..7 {
            assert!(table.contains(&i));
        }
    }

    #[test]
    fn load_never_exceeds_three_quarters() {
        let mut table = HashTable::<u64>::new();

        for i in 0..1000 {
            table.insert(i);
            assert!(table.len() * 4 <= table.capacity() * 3);
            assert!(table.capacity().is_power_of_two());
        }
    }

    #[test]
    fn remove_absent_returns_false() {
        let mut table: HashTable<u32> = (0..10).collect();

        assert!(!table.remove(&100));
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn take_returns_owned_value() {
        let mut table: HashTable<String> = ["x", "y"].iter().map(ToString::to_string).collect();

        assert_eq!(table.take("x"), Some("x".to_string()));
        assert_eq!(table.take("x"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lookups_continue_past_tombstones() {
        let mut table = HashTable::builder().hasher(CollidingHasher).build();

        for i in 0..6_u32 {
            table.insert(i);
        }

        // All values share one probe sequence; punch holes in front of the survivors.
        for i in 0..5_u32 {
            assert!(table.remove(&i));
        }

        assert!(table.contains(&5));
        assert!(!table.contains(&0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_reuses_tombstone_without_duplicating() {
        let mut table = HashTable::builder().hasher(CollidingHasher).build();

        for i in 0..4_u32 {
            table.insert(i);
        }
        assert!(table.remove(&1));

        // Value 3 lies beyond the tombstone; it must be found, not inserted again.
        assert_eq!(table.insert(3), Some(3));
        assert_eq!(table.len(), 3);

        assert_eq!(table.insert(10), None);
        assert_eq!(table.len(), 4);
        assert_eq!(table.iter().copied().collect::<HashSet<_>>(), HashSet::from([0, 2, 3, 10]));
    }

    #[test]
    fn full_cycle_of_tombstones_still_inserts() {
        let mut table = HashTable::builder().hasher(SlotHasher).build();

        // Values 0..8 each start at their own slot; removing them leaves no empty slot at all.
        for i in 0..6_u32 {
            table.insert(i);
        }
        for i in 0..6_u32 {
            assert!(table.remove(&i));
        }
        for i in 6..8_u32 {
            table.insert(i);
            assert!(table.remove(&i));
        }

        assert!(table.is_empty());
        assert_eq!(table.capacity(), MIN_CAPACITY);
        assert!(!table.contains(&3));

        assert_eq!(table.insert(1000), None);
        assert!(table.contains(&1000));
        assert_eq!(table.len(), 1);
    }

    /// Hasher that starts probing for value `n` at slot `n` (modulo the capacity).
    #[derive(Clone, Debug, Default)]
    struct SlotHasher;

    impl KeyHasher<u32> for SlotHasher {
        fn hash(&self, value: &u32) -> u64 {
            u64::from(*value) << TAG_HASH_BITS
        }
    }

    #[test]
    fn removed_values_are_dropped_exactly_once() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let mut table = HashTable::new();

        for key in 0..20 {
            table.insert(Tracked {
                key,
                dropped: Rc::clone(&dropped),
            });
        }

        assert!(table.remove(&7_u32));
        assert_eq!(*dropped.borrow(), vec![7]);

        let taken = table.take(&8_u32).unwrap();
        assert_eq!(dropped.borrow().len(), 1);
        drop(taken);
        assert_eq!(*dropped.borrow(), vec![7, 8]);

        drop(table);
        assert_eq!(dropped.borrow().len(), 20);
    }

    #[test]
    fn replacing_drops_the_old_value_only() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let mut table = HashTable::new();

        table.insert(Tracked {
            key: 1,
            dropped: Rc::clone(&dropped),
        });
        let replaced = table.insert(Tracked {
            key: 1,
            dropped: Rc::clone(&dropped),
        });

        assert!(dropped.borrow().is_empty());
        drop(replaced);
        assert_eq!(*dropped.borrow(), vec![1]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn clear_keeps_capacity_and_drops_values() {
        let drops = Rc::new(Cell::new(0));

        struct Counted(u32, Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.1.set(self.1.get() + 1);
            }
        }

        #[derive(Default)]
        struct ByKey;

        impl KeyHasher<Counted> for ByKey {
            fn hash(&self, value: &Counted) -> u64 {
                u64::from(value.0)
            }
        }

        impl KeyComparator<Counted> for ByKey {
            fn eq(&self, stored: &Counted, key: &Counted) -> bool {
                stored.0 == key.0
            }
        }

        let mut table = HashTable::builder().hasher(ByKey).comparator(ByKey).build();
        for i in 0..50 {
            table.insert(Counted(i, Rc::clone(&drops)));
        }
        let capacity = table.capacity();

        table.clear();

        assert_eq!(drops.get(), 50);
        assert!(table.is_empty());
        assert_eq!(table.capacity(), capacity);
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn reserve_preallocates() {
        let allocator = CountingAllocator::new();
        let mut table = HashTable::<u32, _>::new_in(allocator.clone());

        table.reserve(100);
        let capacity = table.capacity();
        assert!(max_len(capacity) >= 100);
        let allocations = allocator.counts().allocations;

        for i in 0..100 {
            table.insert(i);
        }

        assert_eq!(table.capacity(), capacity);
        assert_eq!(allocator.counts().allocations, allocations);
    }

    #[test]
    fn try_reserve_reports_overflow() {
        let mut table = HashTable::<u32>::new();

        assert!(matches!(
            table.try_reserve(usize::MAX),
            Err(ReserveError::CapacityOverflow { .. })
        ));
        assert_eq!(table.capacity(), 0);
    }

    #[test]
    fn rehash_releases_old_arrays() {
        let allocator = CountingAllocator::new();

        {
            let mut table = HashTable::<u64, _>::new_in(allocator.clone());
            for i in 0..500 {
                table.insert(i);
            }
        }

        let counts = allocator.counts();
        assert_eq!(counts.live_bytes, 0);
        assert_eq!(counts.allocations, counts.deallocations);
    }

    #[test]
    fn clone_is_independent_and_compacts() {
        let mut original: HashTable<u32> = (0..100).collect();
        for i in 0..90 {
            original.remove(&i);
        }

        let mut copy = original.clone();
        copy.insert(1000);

        assert_eq!(copy.len(), 11);
        assert_eq!(original.len(), 10);
        assert!(!original.contains(&1000));
        assert!(copy.capacity() <= original.capacity());
        for i in 90..100 {
            assert!(copy.contains(&i));
        }
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut table: HashTable<(u32, u32), _, _, _> = HashTable::builder()
            .hasher(FirstFieldHasher)
            .comparator(FirstFieldComparator)
            .build();

        table.insert((1, 10));
        table.get_mut(&1_u32).unwrap().1 = 20;

        assert_eq!(table.get(&1_u32), Some(&(1, 20)));
    }

    #[derive(Default)]
    struct FirstFieldHasher;

    impl KeyHasher<(u32, u32)> for FirstFieldHasher {
        fn hash(&self, value: &(u32, u32)) -> u64 {
            KeyHasher::<u32>::hash(&DefaultKeyHasher::default(), &value.0)
        }
    }

    impl KeyHasher<u32> for FirstFieldHasher {
        fn hash(&self, value: &u32) -> u64 {
            KeyHasher::<u32>::hash(&DefaultKeyHasher::default(), value)
        }
    }

    #[derive(Default)]
    struct FirstFieldComparator;

    impl KeyComparator<(u32, u32)> for FirstFieldComparator {
        fn eq(&self, stored: &(u32, u32), key: &(u32, u32)) -> bool {
            stored.0 == key.0
        }
    }

    impl KeyComparator<(u32, u32), u32> for FirstFieldComparator {
        fn eq(&self, stored: &(u32, u32), key: &u32) -> bool {
            stored.0 == *key
        }
    }

    #[test]
    fn iterates_every_value_once() {
        let table: HashTable<u32> = (0..300).collect();

        let iter = table.iter();
        assert_eq!(iter.len(), 300);

        let seen: HashSet<u32> = iter.copied().collect();
        assert_eq!(seen.len(), 300);
        assert!((0..300).all(|i| seen.contains(&i)));
    }

    #[test]
    fn debug_lists_values() {
        let mut table = HashTable::<u32>::new();
        table.insert(42);

        assert_eq!(format!("{table:?}"), "{42}");
    }

    fn occupied_slots<T, A: Allocator, H, C>(table: &HashTable<T, A, H, C>) -> usize {
        (0..table.capacity())
            .filter(|&index| is_occupied(table.tag(index)))
            .count()
    }

    /// Hasher that panics when asked to hash one chosen key.
    #[derive(Debug, Default)]
    struct PanickingHasher {
        panic_on: Cell<Option<u32>>,
    }

    impl KeyHasher<u32> for PanickingHasher {
        fn hash(&self, key: &u32) -> u64 {
            assert_ne!(self.panic_on.get(), Some(*key), "refusing to hash {key}");
            u64::from(*key).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        }
    }

    #[test]
    fn panic_during_rehash_leaves_table_intact() {
        let allocator = CountingAllocator::new();
        let mut table = HashTable::builder()
            .allocator(allocator.clone())
            .hasher(PanickingHasher::default())
            .build();

        for key in 0..6_u32 {
            table.insert(key);
        }
        assert_eq!(table.capacity(), 8);
        let live_bytes = allocator.counts().live_bytes;

        // The next insert has to grow, and rehashing reaches key 3.
        table.hasher().panic_on.set(Some(3));
        let result = panic::catch_unwind(AssertUnwindSafe(|| table.insert(6)));
        assert!(result.is_err());
        table.hasher().panic_on.set(None);

        assert_eq!(table.capacity(), 8);
        assert_eq!(table.len(), 6);
        assert_eq!(occupied_slots(&table), 6);
        assert_eq!(allocator.counts().live_bytes, live_bytes);
        for key in 0..6_u32 {
            assert!(table.contains(&key), "{key} should survive the failed rehash");
        }
        assert!(!table.contains(&6_u32));

        table.insert(6);
        assert_eq!(table.capacity(), 16);
        assert!(table.contains(&6_u32));

        drop(table);
        assert_eq!(allocator.counts().live_bytes, 0);
    }

    /// Allocator that serves a limited number of further allocations and then fails.
    #[derive(Clone, Debug)]
    struct RationedAllocator {
        inner: CountingAllocator,
        remaining: Rc<Cell<usize>>,
    }

    impl PartialEq for RationedAllocator {
        fn eq(&self, other: &Self) -> bool {
            self.inner == other.inner
        }
    }

    impl Allocator for RationedAllocator {
        fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            let remaining = self.remaining.get();

            if remaining == 0 {
                return Err(AllocError::new(layout));
            }

            self.remaining.set(remaining - 1);
            self.inner.try_allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            unsafe {
                self.inner.deallocate(ptr, layout);
            }
        }
    }

    #[test]
    fn failed_try_reserve_leaves_table_unchanged() {
        // Zero fails on the tag array; one lets the tag array through and fails on the values.
        for allowed in [0, 1] {
            let remaining = Rc::new(Cell::new(usize::MAX));
            let allocator = RationedAllocator {
                inner: CountingAllocator::new(),
                remaining: Rc::clone(&remaining),
            };

            let mut table = HashTable::<u32, _>::new_in(allocator.clone());
            for key in 0..6_u32 {
                table.insert(key);
            }
            let live_bytes = allocator.inner.counts().live_bytes;

            remaining.set(allowed);
            let result = table.try_reserve(100);
            assert!(
                matches!(result, Err(ReserveError::AllocFailed(_))),
                "unexpected result {result:?}"
            );

            assert_eq!(table.capacity(), 8);
            assert_eq!(table.len(), 6);
            assert_eq!(allocator.inner.counts().live_bytes, live_bytes);
            assert!((0..6_u32).all(|key| table.contains(&key)));

            remaining.set(usize::MAX);
            table.insert(6);
            assert!(table.contains(&6_u32));

            drop(table);
            assert_eq!(allocator.inner.counts().live_bytes, 0);
        }
    }

    /// Value whose destructor panics when `panics` is set.
    #[derive(Debug, PartialEq, Eq, Hash)]
    struct Brittle {
        key: u32,
        panics: bool,
    }

    impl Drop for Brittle {
        fn drop(&mut self) {
            assert!(!self.panics, "destructor of {} failed", self.key);
        }
    }

    #[test]
    fn panicking_destructor_during_clear_keeps_length_consistent() {
        let mut table = HashTable::new();
        for key in 0..20 {
            table.insert(Brittle {
                key,
                panics: key == 7,
            });
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| table.clear()));
        assert!(result.is_err());

        assert_eq!(table.len(), occupied_slots(&table));
        assert_eq!(table.iter().count(), table.len());
        assert!(table.iter().all(|value| !value.panics));

        table.clear();
        assert!(table.is_empty());
        assert_eq!(occupied_slots(&table), 0);
    }
}
