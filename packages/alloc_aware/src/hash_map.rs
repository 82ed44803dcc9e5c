use std::fmt;
use std::iter::FusedIterator;
use std::mem;

use crate::{
    Allocator, DefaultKeyComparator, DefaultKeyHasher, Global, HashMapBuilder, HashTable,
    KeyComparator, KeyHasher, ReserveError, hash_table,
};

/// A key and its value, stored together in one hash table slot.
#[derive(Clone, Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
}

/// A bare key presented to the table for lookup, so that lookups never need a full entry.
struct Lookup<'a, Q: ?Sized>(&'a Q);

/// Applies a key hasher to the key of an entry or to a bare lookup key.
#[derive(Clone, Debug, Default)]
struct EntryHasher<H>(H);

impl<K, V, H: KeyHasher<K>> KeyHasher<Entry<K, V>> for EntryHasher<H> {
    #[inline]
    fn hash(&self, entry: &Entry<K, V>) -> u64 {
        self.0.hash(&entry.key)
    }
}

impl<Q: ?Sized, H: KeyHasher<Q>> KeyHasher<Lookup<'_, Q>> for EntryHasher<H> {
    #[inline]
    fn hash(&self, lookup: &Lookup<'_, Q>) -> u64 {
        self.0.hash(lookup.0)
    }
}

/// Applies a key comparator to the keys of entries.
#[derive(Clone, Debug, Default)]
struct EntryComparator<C>(C);

impl<K, V, C: KeyComparator<K>> KeyComparator<Entry<K, V>> for EntryComparator<C> {
    #[inline]
    fn eq(&self, stored: &Entry<K, V>, key: &Entry<K, V>) -> bool {
        self.0.eq(&stored.key, &key.key)
    }
}

impl<K, V, Q: ?Sized, C: KeyComparator<K, Q>> KeyComparator<Entry<K, V>, Lookup<'_, Q>>
    for EntryComparator<C>
{
    #[inline]
    fn eq(&self, stored: &Entry<K, V>, key: &Lookup<'_, Q>) -> bool {
        self.0.eq(&stored.key, key.0)
    }
}

type EntryTable<K, V, A, H, C> = HashTable<Entry<K, V>, A, EntryHasher<H>, EntryComparator<C>>;

/// A hash map built on [`HashTable`], storing each key next to its value.
///
/// Hashing and equality only ever look at the key. Lookups accept any key form the hasher and
/// comparator support, so with the defaults a `HashMap<String, _>` can be queried with `&str`.
///
/// Inserting a key that is already present replaces only the value. The stored key is kept.
///
/// # Examples
///
/// ```
/// use alloc_aware::HashMap;
///
/// let mut ages = HashMap::<String, u32>::new();
///
/// ages.insert("alice".to_string(), 30);
/// assert_eq!(ages.insert("alice".to_string(), 31), Some(30));
///
/// assert_eq!(ages.len(), 1);
/// assert_eq!(ages.get("alice"), Some(&31));
/// ```
pub struct HashMap<K, V, A = Global, H = DefaultKeyHasher, C = DefaultKeyComparator>
where
    A: Allocator,
{
    table: EntryTable<K, V, A, H, C>,
}

impl<K, V> HashMap<K, V> {
    /// Creates an empty map with the default allocator, hasher and comparator.
    ///
    /// Does not allocate until the first insert.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(Global)
    }

    /// Starts building a map with a custom allocator, hasher, comparator or initial capacity.
    pub fn builder() -> HashMapBuilder<K, V> {
        HashMapBuilder::new()
    }
}

impl<K, V, A: Allocator> HashMap<K, V, A> {
    /// Creates an empty map that will obtain its storage from `allocator`.
    #[must_use]
    pub fn new_in(allocator: A) -> Self {
        Self::from_parts(0, allocator, DefaultKeyHasher::default(), DefaultKeyComparator)
    }

    /// Creates an empty map with room for at least `len` entries before it needs to grow.
    #[must_use]
    pub fn with_capacity_in(len: usize, allocator: A) -> Self {
        Self::from_parts(len, allocator, DefaultKeyHasher::default(), DefaultKeyComparator)
    }
}

impl<K, V, A: Allocator, H, C> HashMap<K, V, A, H, C> {
    pub(crate) fn from_parts(len: usize, allocator: A, hasher: H, comparator: C) -> Self {
        Self {
            table: HashTable::from_parts(
                len,
                allocator,
                EntryHasher(hasher),
                EntryComparator(comparator),
            ),
        }
    }

    /// Returns the number of entries.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map holds no entries.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of slots of the underlying table.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the allocator.
    #[must_use]
    pub fn allocator(&self) -> &A {
        self.table.allocator()
    }

    /// Returns the key hasher.
    #[must_use]
    pub fn hasher(&self) -> &H {
        &self.table.hasher().0
    }

    /// Returns an iterator over the entries, in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Returns the value stored for `key`, if any.
    #[must_use]
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<&V>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<K, Q>,
    {
        self.table.get(&Lookup(key)).map(|entry| &entry.value)
    }

    /// Returns the value stored for `key` for modification, if any.
    #[must_use]
    pub fn get_mut<Q: ?Sized>(&mut self, key: &Q) -> Option<&mut V>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<K, Q>,
    {
        // Only the value is handed out, so the key identity cannot change.
        self.table
            .get_mut(&Lookup(key))
            .map(|entry| &mut entry.value)
    }

    /// Returns `true` if the map holds an entry for `key`.
    #[must_use]
    pub fn contains_key<Q: ?Sized>(&self, key: &Q) -> bool
    where
        H: KeyHasher<Q>,
        C: KeyComparator<K, Q>,
    {
        self.table.contains(&Lookup(key))
    }

    /// Stores `value` for `key`, returning the previous value if the key was present.
    ///
    /// When the key is present, only its value is replaced and the stored key is kept.
    pub fn insert(&mut self, key: K, value: V) -> Option<V>
    where
        H: KeyHasher<K>,
        C: KeyComparator<K>,
    {
        self.table
            .insert_or_update(Entry { key, value }, |stored, new| {
                mem::replace(&mut stored.value, new.value)
            })
    }

    /// Removes and drops the entry for `key`. Returns `false` if there was none.
    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> bool
    where
        H: KeyHasher<Q>,
        C: KeyComparator<K, Q>,
    {
        self.table.remove(&Lookup(key))
    }

    /// Removes the entry for `key` and returns its value.
    pub fn take<Q: ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<K, Q>,
    {
        self.table.take(&Lookup(key)).map(|entry| entry.value)
    }

    /// Removes the entry for `key` and returns the stored key together with its value.
    pub fn take_entry<Q: ?Sized>(&mut self, key: &Q) -> Option<(K, V)>
    where
        H: KeyHasher<Q>,
        C: KeyComparator<K, Q>,
    {
        self.table
            .take(&Lookup(key))
            .map(|entry| (entry.key, entry.value))
    }

    /// Drops every entry, keeping the capacity.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Ensures the map can hold at least `len` entries in total without growing.
    ///
    /// # Panics
    ///
    /// Panics if the required capacity cannot be represented. Allocation failure terminates
    /// the process.
    pub fn reserve(&mut self, len: usize)
    where
        H: KeyHasher<K>,
    {
        self.table.reserve(len);
    }

    /// Fallible version of [`reserve()`][Self::reserve].
    ///
    /// # Errors
    ///
    /// Returns [`ReserveError`] if the capacity cannot be represented or allocated. The map is
    /// unchanged in that case.
    pub fn try_reserve(&mut self, len: usize) -> Result<(), ReserveError>
    where
        H: KeyHasher<K>,
    {
        self.table.try_reserve(len)
    }
}

impl<K, V, A, H, C> Clone for HashMap<K, V, A, H, C>
where
    K: Clone,
    V: Clone,
    A: Allocator + Clone,
    H: KeyHasher<K> + Clone,
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K, V, A, H, C> fmt::Debug for HashMap<K, V, A, H, C>
where
    K: fmt::Debug,
    V: fmt::Debug,
    A: Allocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, A, H, C> Default for HashMap<K, V, A, H, C>
where
    A: Allocator + Default,
    H: Default,
    C: Default,
{
    fn default() -> Self {
        Self::from_parts(0, A::default(), H::default(), C::default())
    }
}

impl<K, V, A, H, C> Extend<(K, V)> for HashMap<K, V, A, H, C>
where
    A: Allocator,
    H: KeyHasher<K>,
    C: KeyComparator<K>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();

        self.reserve(self.len().saturating_add(lower));

        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for HashMap<K, V>
where
    DefaultKeyHasher: KeyHasher<K>,
    DefaultKeyComparator: KeyComparator<K>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, A: Allocator, H, C> IntoIterator for &'a HashMap<K, V, A, H, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of a [`HashMap`], in slot order.
///
/// Created by [`HashMap::iter()`].
pub struct Iter<'a, K, V> {
    inner: hash_table::Iter<'a, Entry<K, V>>,
}

impl<K, V> fmt::Debug for Iter<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.inner.len())
            .finish()
    }
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| (&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::CountingAllocator;

    assert_impl_all!(HashMap<String, u32>: Send, Sync, Clone, Default, fmt::Debug);
    assert_not_impl_any!(HashMap<u32, Rc<u32>>: Send, Sync);
    assert_impl_all!(Iter<'static, u32, u32>: Send, Sync, Clone, ExactSizeIterator);

    /// Key whose equality and hash ignore the `tag` field, so we can tell stored keys apart
    /// from equal keys passed in later.
    #[derive(Clone, Debug)]
    struct TaggedKey {
        id: u32,
        tag: &'static str,
    }

    impl PartialEq for TaggedKey {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl Eq for TaggedKey {}

    impl std::hash::Hash for TaggedKey {
        fn hash<S: std::hash::Hasher>(&self, state: &mut S) {
            self.id.hash(state);
        }
    }

    #[test]
    fn insert_overwrites_value_and_keeps_key() {
        let mut map = HashMap::new();

        let first = TaggedKey { id: 1, tag: "first" };
        let second = TaggedKey { id: 1, tag: "second" };

        assert_eq!(map.insert(first, "a"), None);
        assert_eq!(map.insert(second.clone(), "b"), Some("a"));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&second), Some(&"b"));

        let (stored_key, value) = map.iter().next().unwrap();
        assert_eq!(stored_key.tag, "first");
        assert_eq!(*value, "b");
    }

    #[test]
    fn borrowed_key_lookups() {
        let mut map = HashMap::<String, u32>::new();
        map.insert("one".to_string(), 1);
        map.insert("two".to_string(), 2);

        assert!(map.contains_key("one"));
        assert_eq!(map.get("two"), Some(&2));
        assert_eq!(map.get("three"), None);

        *map.get_mut("two").unwrap() += 10;
        assert_eq!(map.get("two"), Some(&12));

        assert!(map.remove("one"));
        assert!(!map.remove("one"));
        assert_eq!(map.take("two"), Some(12));
        assert!(map.is_empty());
    }

    #[test]
    fn take_entry_returns_stored_key() {
        let mut map = HashMap::new();
        map.insert(TaggedKey { id: 9, tag: "stored" }, 90);

        let (key, value) = map
            .take_entry(&TaggedKey {
                id: 9,
                tag: "lookup",
            })
            .unwrap();

        assert_eq!(key.tag, "stored");
        assert_eq!(value, 90);
    }

    #[test]
    fn many_entries_survive_growth() {
        let mut map = HashMap::<u64, String>::new();

        for i in 0..2000 {
            map.insert(i, i.to_string());
        }

        assert_eq!(map.len(), 2000);
        for i in 0..2000 {
            assert_eq!(map.get(&i), Some(&i.to_string()));
        }
    }

    #[test]
    fn values_are_dropped_with_the_map() {
        let dropped = Rc::new(RefCell::new(0_usize));

        struct Counted(Rc<RefCell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }

        {
            let mut map = HashMap::new();
            for i in 0..10_u32 {
                map.insert(i, Counted(Rc::clone(&dropped)));
            }

            // Overwriting returns the old value; dropping it counts once.
            drop(map.insert(3, Counted(Rc::clone(&dropped))));
            assert_eq!(*dropped.borrow(), 1);

            assert!(map.remove(&4));
            assert_eq!(*dropped.borrow(), 2);
        }

        assert_eq!(*dropped.borrow(), 11);
    }

    #[test]
    fn clone_debug_and_collect() {
        let map: HashMap<u32, u32> = (0..5).map(|i| (i, i * i)).collect();
        let mut copy = map.clone();
        copy.insert(0, 100);

        assert_eq!(map.get(&0), Some(&0));
        assert_eq!(copy.get(&0), Some(&100));

        let sorted: BTreeMap<u32, u32> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(sorted.len(), 5);
        assert_eq!(sorted[&4], 16);

        let single: HashMap<u32, &str> = [(7, "seven")].into_iter().collect();
        assert_eq!(format!("{single:?}"), r#"{7: "seven"}"#);
    }

    #[test]
    fn custom_allocator_and_capacity() {
        let allocator = CountingAllocator::new();
        let mut map = HashMap::<u32, u32, _>::with_capacity_in(50, allocator.clone());
        let capacity = map.capacity();

        for i in 0..50 {
            map.insert(i, i);
        }

        assert_eq!(map.capacity(), capacity);
        assert_eq!(map.allocator(), &allocator);

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), capacity);

        drop(map);
        assert_eq!(allocator.counts().live_bytes, 0);
    }

    /// Key hasher that counts how many times it has been called.
    #[derive(Debug, Default)]
    struct CountingHasher {
        calls: Cell<usize>,
    }

    impl KeyHasher<u32> for CountingHasher {
        fn hash(&self, key: &u32) -> u64 {
            self.calls.set(self.calls.get() + 1);
            u64::from(*key).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        }
    }

    #[test]
    fn insert_hashes_the_key_once() {
        let mut map = HashMap::<u32, u32>::builder()
            .hasher(CountingHasher::default())
            .capacity(16)
            .build();

        assert_eq!(map.insert(1, 10), None);
        assert_eq!(map.hasher().calls.get(), 1);

        assert_eq!(map.insert(1, 11), Some(10));
        assert_eq!(map.hasher().calls.get(), 2);

        assert_eq!(map.get(&1), Some(&11));
    }

    #[test]
    fn extend_overwrites_existing_keys() {
        let mut map = HashMap::<&str, u32>::new();
        map.extend([("a", 1), ("b", 2)]);
        map.extend([("a", 10), ("c", 3)]);

        assert_eq!(map.len(), 3);
        assert_eq!(map.get("a"), Some(&10));
        assert_eq!((&map).into_iter().len(), 3);
    }
}
