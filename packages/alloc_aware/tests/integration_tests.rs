//! Integration tests for the `alloc_aware` package.
//!
//! These exercise the containers through the public API only, with instrumented and
//! non-interchangeable allocators plugged in from the outside.

use std::alloc::Layout;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;
use std::rc::Rc;

use alloc_aware::{
    AllocError, Allocator, CountingAllocator, Global, HashMap, HashTable, KeyComparator,
    KeyHasher, SmallVec,
};

/// Allocator that refuses to be interchangeable with any instance, itself included.
#[derive(Clone, Debug, Default)]
struct IncompatibleAllocator {
    inner: CountingAllocator,
}

impl PartialEq for IncompatibleAllocator {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl Allocator for IncompatibleAllocator {
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.inner.try_allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.inner.deallocate(ptr, layout);
        }
    }
}

/// Value whose destruction is recorded by key.
#[derive(Debug)]
struct Tracked {
    key: u32,
    destroyed: Rc<RefCell<BTreeSet<u32>>>,
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

impl Drop for Tracked {
    fn drop(&mut self) {
        let newly_destroyed = self.destroyed.borrow_mut().insert(self.key);
        assert!(newly_destroyed, "value {} destroyed twice", self.key);
    }
}

/// Looks up [`Tracked`] values by their bare key.
#[derive(Debug, Default)]
struct TrackedByKey;

impl KeyHasher<Tracked> for TrackedByKey {
    fn hash(&self, value: &Tracked) -> u64 {
        u64::from(value.key).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

impl KeyHasher<u32> for TrackedByKey {
    fn hash(&self, key: &u32) -> u64 {
        u64::from(*key).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

impl KeyComparator<Tracked> for TrackedByKey {
    fn eq(&self, stored: &Tracked, key: &Tracked) -> bool {
        stored.key == key.key
    }
}

impl KeyComparator<Tracked, u32> for TrackedByKey {
    fn eq(&self, stored: &Tracked, key: &u32) -> bool {
        stored.key == *key
    }
}

#[test]
fn table_with_three_thousand_keys() {
    let mut table = HashTable::<u32>::new();

    for i in 0..3000 {
        table.insert(i);
    }

    assert_eq!(table.len(), 3000);
    for i in 0..3000 {
        assert!(table.contains(&i), "{i} should be present");
    }
    for i in 3000..6000 {
        assert!(!table.contains(&i), "{i} should be absent");
    }
}

#[test]
fn sequence_switches_to_heap_right_after_inline_capacity() {
    let allocator = CountingAllocator::new();
    let mut items = SmallVec::<u32, _>::new_in(allocator.clone());
    let inline = SmallVec::<u32, CountingAllocator>::INLINE_CAPACITY;

    for i in 0..inline {
        items.push(u32::try_from(i).unwrap());
        assert!(items.is_inline(), "must still be inline at size {}", items.len());
    }
    assert_eq!(allocator.counts().allocations, 0);

    items.push(1234);
    assert!(!items.is_inline());
    assert_eq!(allocator.counts().allocations, 1);
}

#[test]
fn removing_even_keys_destroys_exactly_those() {
    let destroyed = Rc::new(RefCell::new(BTreeSet::new()));

    let mut table = HashTable::builder()
        .hasher(TrackedByKey)
        .comparator(TrackedByKey)
        .build();

    for key in 0..200 {
        table.insert(Tracked {
            key,
            destroyed: Rc::clone(&destroyed),
        });
    }

    for key in (0..200_u32).step_by(2) {
        assert!(table.remove(&key));
    }

    assert_eq!(table.len(), 100);
    for key in 0..200_u32 {
        assert_eq!(table.contains(&key), key % 2 == 1, "key {key}");
    }

    let expected: BTreeSet<u32> = (0..200).step_by(2).collect();
    assert_eq!(*destroyed.borrow(), expected);

    drop(table);
    assert_eq!(destroyed.borrow().len(), 200);
}

#[test]
fn moving_heap_sequence_keeps_storage_address() {
    let mut source = SmallVec::<u64>::new();
    for i in 0..100 {
        source.push(i);
    }
    let address = source.as_ptr();

    let destination = source.take();

    assert_eq!(destination.as_ptr(), address);
    assert_eq!(destination.len(), 100);
    assert_eq!(source.len(), 0);
    assert!(source.is_inline());

    // A plain Rust move transfers the block just the same.
    let moved = destination;
    assert_eq!(moved.as_ptr(), address);
}

#[test]
fn map_reinsert_overwrites_value() {
    let mut map = HashMap::<String, &str>::new();

    map.insert("K".to_string(), "A");
    map.insert("K".to_string(), "B");

    assert_eq!(map.len(), 1);
    assert_eq!(map.get("K"), Some(&"B"));
}

#[test]
fn move_assign_across_incompatible_allocators_relocates() {
    let source_allocator = IncompatibleAllocator::default();
    let destination_allocator = IncompatibleAllocator::default();

    let mut source = SmallVec::<String, _>::new_in(source_allocator.clone());
    for i in 0..50 {
        source.push(i.to_string());
    }
    let mut destination = SmallVec::<String, _>::new_in(destination_allocator.clone());
    let source_address = source.as_ptr();

    destination.move_from(&mut source);

    assert_ne!(destination.as_ptr(), source_address);
    assert_eq!(destination.len(), 50);
    assert_eq!(destination[49], "49");
    assert!(source.is_empty());

    // The source returned its block; the destination holds one from its own allocator.
    assert_eq!(source_allocator.inner.counts().live_bytes, 0);
    assert!(destination_allocator.inner.counts().live_bytes > 0);

    drop(destination);
    assert_eq!(destination_allocator.inner.counts().live_bytes, 0);
}

#[test]
fn move_assign_with_interchangeable_allocators_adopts_block() {
    let allocator = CountingAllocator::new();

    let mut source = SmallVec::<u32, _>::new_in(allocator.clone());
    source.extend(0..100);
    let mut destination = SmallVec::<u32, _>::new_in(allocator.clone());
    let address = source.as_ptr();
    let allocations = allocator.counts().allocations;

    destination.move_from(&mut source);

    assert_eq!(destination.as_ptr(), address);
    assert_eq!(allocator.counts().allocations, allocations);
    assert!(source.is_empty());
}

#[test]
fn containers_release_everything() {
    let allocator = CountingAllocator::new();

    {
        let mut items = SmallVec::<String, _>::new_in(allocator.clone());
        let mut table = HashTable::<String, _>::new_in(allocator.clone());
        let mut map = HashMap::<u32, SmallVec<u8>, _>::new_in(allocator.clone());

        for i in 0..500_u32 {
            items.push(i.to_string());
            table.insert(i.to_string());
            map.insert(i, SmallVec::from_slice(&[1, 2, 3]));
        }

        for i in (0..500_u32).step_by(3) {
            table.remove(i.to_string().as_str());
            map.remove(&i);
        }

        items.clear();
        map.clear();
    }

    let counts = allocator.counts();
    assert_eq!(counts.live_bytes, 0);
    assert_eq!(counts.allocations, counts.deallocations);
}

#[test]
fn global_allocator_is_the_default() {
    let items = SmallVec::<u8>::new();
    let table = HashTable::<u8>::new();

    assert_eq!(items.allocator(), &Global);
    assert_eq!(table.allocator(), &Global);
}
