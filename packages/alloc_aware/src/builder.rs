use std::cell::Cell;
use std::marker::PhantomData;

use crate::{Allocator, DefaultKeyComparator, DefaultKeyHasher, Global, HashMap, HashTable};

/// Builder for creating an instance of [`HashTable`].
///
/// Every setting is optional. Without changes the builder produces the same table as
/// [`HashTable::new()`]. Setting the allocator, hasher or comparator changes the corresponding
/// type parameter of the table that is built.
///
/// # Examples
///
/// ```
/// use alloc_aware::{CountingAllocator, DefaultKeyHasher, HashTable};
///
/// let allocator = CountingAllocator::new();
///
/// let mut table = HashTable::<u64>::builder()
///     .allocator(allocator.clone())
///     .hasher(DefaultKeyHasher::with_seed(0x5eed))
///     .capacity(100)
///     .build();
///
/// let allocations = allocator.counts().allocations;
/// for i in 0..100 {
///     table.insert(i);
/// }
/// assert_eq!(allocator.counts().allocations, allocations);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) if its parts are, but it is not thread-safe
/// ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct HashTableBuilder<T, A = Global, H = DefaultKeyHasher, C = DefaultKeyComparator> {
    allocator: A,
    hasher: H,
    comparator: C,
    capacity: usize,

    _values: PhantomData<fn() -> T>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> HashTableBuilder<T> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            allocator: Global,
            hasher: DefaultKeyHasher::default(),
            comparator: DefaultKeyComparator,
            capacity: 0,
            _values: PhantomData,
            _not_sync: PhantomData,
        }
    }
}

impl<T, A, H, C> HashTableBuilder<T, A, H, C> {
    /// Sets the allocator the table obtains its arrays from.
    #[inline]
    pub fn allocator<A2: Allocator>(self, allocator: A2) -> HashTableBuilder<T, A2, H, C> {
        HashTableBuilder {
            allocator,
            hasher: self.hasher,
            comparator: self.comparator,
            capacity: self.capacity,
            _values: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the hasher used for values and lookup keys.
    #[inline]
    pub fn hasher<H2>(self, hasher: H2) -> HashTableBuilder<T, A, H2, C> {
        HashTableBuilder {
            allocator: self.allocator,
            hasher,
            comparator: self.comparator,
            capacity: self.capacity,
            _values: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the comparator that decides whether a stored value matches a key.
    #[inline]
    pub fn comparator<C2>(self, comparator: C2) -> HashTableBuilder<T, A, H, C2> {
        HashTableBuilder {
            allocator: self.allocator,
            hasher: self.hasher,
            comparator,
            capacity: self.capacity,
            _values: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of values the table can hold before it first needs to grow.
    ///
    /// The default is zero, in which case nothing is allocated until the first insert.
    #[inline]
    pub fn capacity(mut self, len: usize) -> Self {
        self.capacity = len;
        self
    }

    /// Builds the table with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the capacity cannot be represented. Allocation failure terminates the process.
    #[must_use]
    #[inline]
    pub fn build(self) -> HashTable<T, A, H, C>
    where
        A: Allocator,
    {
        HashTable::from_parts(self.capacity, self.allocator, self.hasher, self.comparator)
    }
}

/// Builder for creating an instance of [`HashMap`].
///
/// Works like [`HashTableBuilder`], with the hasher and comparator applied to keys.
///
/// # Examples
///
/// ```
/// use alloc_aware::{DefaultKeyHasher, HashMap};
///
/// let mut map = HashMap::<String, u32>::builder()
///     .hasher(DefaultKeyHasher::with_seed(7))
///     .capacity(16)
///     .build();
///
/// map.insert("answer".to_string(), 42);
/// assert_eq!(map.get("answer"), Some(&42));
/// ```
#[derive(Debug)]
#[must_use]
pub struct HashMapBuilder<K, V, A = Global, H = DefaultKeyHasher, C = DefaultKeyComparator> {
    allocator: A,
    hasher: H,
    comparator: C,
    capacity: usize,

    _entries: PhantomData<fn() -> (K, V)>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<K, V> HashMapBuilder<K, V> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            allocator: Global,
            hasher: DefaultKeyHasher::default(),
            comparator: DefaultKeyComparator,
            capacity: 0,
            _entries: PhantomData,
            _not_sync: PhantomData,
        }
    }
}

impl<K, V, A, H, C> HashMapBuilder<K, V, A, H, C> {
    /// Sets the allocator the map obtains its storage from.
    #[inline]
    pub fn allocator<A2: Allocator>(self, allocator: A2) -> HashMapBuilder<K, V, A2, H, C> {
        HashMapBuilder {
            allocator,
            hasher: self.hasher,
            comparator: self.comparator,
            capacity: self.capacity,
            _entries: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the hasher used for keys.
    #[inline]
    pub fn hasher<H2>(self, hasher: H2) -> HashMapBuilder<K, V, A, H2, C> {
        HashMapBuilder {
            allocator: self.allocator,
            hasher,
            comparator: self.comparator,
            capacity: self.capacity,
            _entries: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the comparator used for keys.
    #[inline]
    pub fn comparator<C2>(self, comparator: C2) -> HashMapBuilder<K, V, A, H, C2> {
        HashMapBuilder {
            allocator: self.allocator,
            hasher: self.hasher,
            comparator,
            capacity: self.capacity,
            _entries: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of entries the map can hold before it first needs to grow.
    #[inline]
    pub fn capacity(mut self, len: usize) -> Self {
        self.capacity = len;
        self
    }

    /// Builds the map with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the capacity cannot be represented. Allocation failure terminates the process.
    #[must_use]
    #[inline]
    pub fn build(self) -> HashMap<K, V, A, H, C>
    where
        A: Allocator,
    {
        HashMap::from_parts(self.capacity, self.allocator, self.hasher, self.comparator)
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::CountingAllocator;

    assert_impl_all!(HashTableBuilder<u32>: Send);
    assert_not_impl_any!(HashTableBuilder<u32>: Sync);
    assert_impl_all!(HashMapBuilder<u32, String>: Send);
    assert_not_impl_any!(HashMapBuilder<u32, String>: Sync);

    #[test]
    fn default_builder_matches_new() {
        let table = HashTable::<u32>::builder().build();

        assert_eq!(table.capacity(), HashTable::<u32>::new().capacity());
        assert!(table.is_empty());
    }

    #[test]
    fn capacity_preallocates() {
        let table = HashTable::<u32>::builder().capacity(7).build();

        assert_eq!(table.capacity(), 16);
    }

    #[test]
    fn table_uses_configured_allocator() {
        let allocator = CountingAllocator::new();

        let mut table = HashTable::<u32>::builder()
            .allocator(allocator.clone())
            .build();
        table.insert(1);

        assert_eq!(table.allocator(), &allocator);
        assert!(allocator.counts().allocations > 0);
    }

    #[test]
    fn seeded_hasher_does_not_change_results() {
        let mut table = HashTable::<u32>::builder()
            .hasher(DefaultKeyHasher::with_seed(99))
            .comparator(DefaultKeyComparator)
            .build();

        for i in 0..100 {
            table.insert(i);
        }

        assert_eq!(table.len(), 100);
        assert!((0..100).all(|i| table.contains(&i)));
    }

    #[test]
    fn map_builder_configures_map() {
        let allocator = CountingAllocator::new();

        let mut map = HashMap::<u32, u32>::builder()
            .allocator(allocator.clone())
            .hasher(DefaultKeyHasher::with_seed(3))
            .capacity(40)
            .build();
        let capacity = map.capacity();

        for i in 0..40 {
            map.insert(i, i + 1);
        }

        assert_eq!(map.capacity(), capacity);
        assert_eq!(map.get(&39), Some(&40));
        assert_eq!(map.allocator(), &allocator);
    }
}
