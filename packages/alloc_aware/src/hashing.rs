//! Pluggable hashing and equality for the hash containers.
//!
//! A hash table is parameterized by a [`KeyHasher`] that turns a value (or a lookup key) into a
//! 64-bit hash and a [`KeyComparator`] that decides whether a stored value matches a lookup key.
//! Both are instances stored in the table, so they may carry state such as a seed.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};

use foldhash::fast::FixedState;

/// Computes 64-bit hashes of values of type `Q`.
///
/// Any two values considered equal by the [`KeyComparator`] used alongside this hasher must
/// produce the same hash.
pub trait KeyHasher<Q: ?Sized> {
    /// Returns the hash of `value`.
    fn hash(&self, value: &Q) -> u64;
}

/// Decides whether a stored value of type `T` matches a lookup key of type `Q`.
pub trait KeyComparator<T: ?Sized, Q: ?Sized = T> {
    /// Returns `true` if `stored` and `key` are equal.
    fn eq(&self, stored: &T, key: &Q) -> bool;
}

/// Hashes any [`Hash`] type with a fast, fixed-seed hash function.
///
/// The default seed is a constant, so hashes are reproducible across runs. Use
/// [`with_seed()`][Self::with_seed] for a different (still deterministic) hash function.
#[derive(Clone, Debug, Default)]
pub struct DefaultKeyHasher {
    state: FixedState,
}

impl DefaultKeyHasher {
    /// Creates a hasher whose output depends on `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: FixedState::with_seed(seed),
        }
    }
}

impl<Q: Hash + ?Sized> KeyHasher<Q> for DefaultKeyHasher {
    #[inline]
    fn hash(&self, value: &Q) -> u64 {
        self.state.hash_one(value)
    }
}

/// Compares with [`Eq`], looking up owned values through any form they can be borrowed as.
///
/// A table of `String` can therefore be queried with a `&str`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DefaultKeyComparator;

impl<T, Q> KeyComparator<T, Q> for DefaultKeyComparator
where
    T: Borrow<Q> + ?Sized,
    Q: Eq + ?Sized,
{
    #[inline]
    fn eq(&self, stored: &T, key: &Q) -> bool {
        stored.borrow() == key
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(DefaultKeyHasher: Send, Sync, Clone, Default);
    assert_impl_all!(DefaultKeyComparator: Send, Sync, Copy, Default);

    #[test]
    fn default_hasher_is_deterministic() {
        let a = DefaultKeyHasher::default();
        let b = DefaultKeyHasher::default();

        assert_eq!(KeyHasher::<u64>::hash(&a, &42), KeyHasher::<u64>::hash(&b, &42));
        assert_eq!(
            KeyHasher::<str>::hash(&a, "hello"),
            KeyHasher::<str>::hash(&b, "hello")
        );
    }

    #[test]
    fn borrowed_forms_hash_like_owned_forms() {
        let hasher = DefaultKeyHasher::default();
        let owned = String::from("borrowed");

        assert_eq!(
            KeyHasher::<String>::hash(&hasher, &owned),
            KeyHasher::<str>::hash(&hasher, "borrowed")
        );
    }

    #[test]
    fn seed_changes_hashes() {
        let a = DefaultKeyHasher::with_seed(1);
        let b = DefaultKeyHasher::with_seed(2);

        let differing = (0_u64..16)
            .filter(|v| KeyHasher::<u64>::hash(&a, v) != KeyHasher::<u64>::hash(&b, v))
            .count();

        assert!(differing > 0);
    }

    #[test]
    fn comparator_matches_borrowed_keys() {
        let stored = String::from("key");

        assert!(KeyComparator::<String, str>::eq(&DefaultKeyComparator, &stored, "key"));
        assert!(!KeyComparator::<String, str>::eq(&DefaultKeyComparator, &stored, "other"));
        assert!(KeyComparator::<u32>::eq(&DefaultKeyComparator, &5, &5));
    }
}
