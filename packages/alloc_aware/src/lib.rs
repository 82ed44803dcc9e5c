#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Allocator-aware containers with explicit control over memory layout, allocation and moves.
//!
//! This crate provides a small set of in-memory data structures that obtain all their memory
//! through a pluggable [`Allocator`]:
//!
//! * [`SmallVec`] - a contiguous, growable sequence that keeps small numbers of elements
//!   inside the container itself and moves them to a heap block once they no longer fit.
//! * [`HashTable`] - an open-addressing hash set with one-byte tags per slot, tombstones for
//!   removed values and a 75% load limit.
//! * [`HashMap`] - a key/value map layered directly over [`HashTable`].
//!
//! # Allocators
//!
//! Containers are generic over an [`Allocator`] and default to [`Global`], the process heap.
//! Allocators are only called when a container crosses a growth boundary. Allocator equality
//! means "interchangeable": containers use it to decide whether a heap block may change owners
//! directly when moving elements between containers.
//!
//! [`CountingAllocator`] wraps another allocator and counts every call, which is handy for
//! checking the allocation behavior of code built on these containers.
//!
//! # Hashing
//!
//! The hash containers take a [`KeyHasher`] and a [`KeyComparator`] as values, so both may carry
//! state. The defaults, [`DefaultKeyHasher`] and [`DefaultKeyComparator`], work for any
//! [`Hash`][std::hash::Hash] + [`Eq`] type and accept any borrowed form of the stored type for
//! lookups.
//!
//! # Failure handling
//!
//! Running out of memory terminates the process through [`std::alloc::handle_alloc_error()`] and
//! requesting an impossible capacity panics. Callers who want to handle either condition can
//! reserve capacity up front through the `try_reserve()` methods, which return [`ReserveError`].
//!
//! # Observability
//!
//! The containers emit `trace`-level [`tracing`] events for their linear-time transitions: a
//! sequence moving to the heap or resizing its heap block, and a hash table rehashing. No
//! subscriber is installed by this crate.
//!
//! # Examples
//!
//! ```
//! use alloc_aware::{CountingAllocator, HashMap, SmallVec};
//!
//! let allocator = CountingAllocator::new();
//!
//! let mut digits = SmallVec::<u8, _>::new_in(allocator.clone());
//! digits.extend([1, 2, 3]);
//! assert!(digits.is_inline());
//! assert_eq!(allocator.counts().allocations, 0);
//!
//! let mut words = HashMap::<String, usize>::builder()
//!     .allocator(allocator.clone())
//!     .build();
//!
//! for word in "the quick brown fox jumps over the lazy dog".split(' ') {
//!     let count = words.get(word).copied().unwrap_or(0);
//!     words.insert(word.to_string(), count + 1);
//! }
//!
//! assert_eq!(words.get("the"), Some(&2));
//! assert_eq!(words.len(), 8);
//! ```

mod allocator;
mod builder;
mod counting;
mod error;
mod hash_map;
mod hash_table;
mod hashing;
mod relocate;
mod small_vec;

pub use allocator::*;
pub use builder::*;
pub use counting::*;
pub use error::{AllocError, ReserveError};
pub use hash_map::{HashMap, Iter as HashMapIter};
pub use hash_table::{HashTable, Iter as HashTableIter};
pub use hashing::*;
pub use relocate::*;
pub use small_vec::SmallVec;
pub use std::alloc::Layout;
