//! Bulk move and destroy helpers shared by the containers.
//!
//! Relocating a value means moving it to a new address and treating the old address as
//! uninitialized afterwards. Every Rust type can be relocated with a plain byte copy (moves
//! never run user code), so the containers always take the bulk-copy path and, when growing an
//! existing heap block, the allocator's reallocation path.

use std::ptr::{self, NonNull};

/// Returns whether values of `T` may be relocated with a plain byte copy.
///
/// Always `true` in Rust. Containers consult this to pick between reallocating a heap block in
/// place and allocating, relocating and releasing.
#[must_use]
pub const fn is_trivially_relocatable<T>() -> bool {
    true
}

/// Moves `count` values from `src` to `dst`.
///
/// After the call the `count` values live at `dst` and the source slots are logically
/// uninitialized: they must not be read or dropped again.
///
/// # Safety
///
/// The caller must guarantee that:
///
/// * `src` points to `count` initialized values of `T`.
/// * `dst` is valid for writes of `count` values of `T`.
/// * The two ranges do not overlap.
pub unsafe fn relocate_n<T>(dst: NonNull<T>, src: NonNull<T>, count: usize) {
    if count == 0 {
        return;
    }

    // SAFETY: Forwarding the caller's guarantees about validity and non-overlap.
    unsafe {
        ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), count);
    }
}

/// Drops `count` values in place, starting at `first`.
///
/// Does nothing for types without drop glue.
///
/// # Safety
///
/// The caller must guarantee that `first` points to `count` initialized values of `T` that are
/// not used again afterwards.
pub unsafe fn destroy_n<T>(first: NonNull<T>, count: usize) {
    if count == 0 || !std::mem::needs_drop::<T>() {
        return;
    }

    let slice = ptr::slice_from_raw_parts_mut(first.as_ptr(), count);

    // SAFETY: The caller guarantees the range holds `count` initialized values that are dead
    // after this call.
    unsafe {
        ptr::drop_in_place(slice);
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::mem::MaybeUninit;
    use std::rc::Rc;

    use super::*;

    /// Test helper that counts how many times values of it have been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn every_type_is_trivially_relocatable() {
        assert!(is_trivially_relocatable::<u8>());
        assert!(is_trivially_relocatable::<String>());
        assert!(is_trivially_relocatable::<Rc<u32>>());
    }

    #[test]
    fn relocate_moves_values_without_dropping() {
        let drops = Rc::new(Cell::new(0));

        let mut src: [MaybeUninit<DropCounter>; 3] = [const { MaybeUninit::uninit() }; 3];
        for slot in &mut src {
            slot.write(DropCounter {
                drops: Rc::clone(&drops),
            });
        }

        let mut dst: [MaybeUninit<DropCounter>; 3] = [const { MaybeUninit::uninit() }; 3];

        unsafe {
            relocate_n(
                NonNull::new(dst.as_mut_ptr().cast::<DropCounter>()).unwrap(),
                NonNull::new(src.as_mut_ptr().cast::<DropCounter>()).unwrap(),
                3,
            );
        }

        assert_eq!(drops.get(), 0);

        // The source is now logically uninitialized; only the destination is dropped.
        unsafe {
            destroy_n(
                NonNull::new(dst.as_mut_ptr().cast::<DropCounter>()).unwrap(),
                3,
            );
        }

        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn relocate_preserves_values() {
        let src = [1_u32, 2, 3, 4];
        let mut dst = [0_u32; 4];

        unsafe {
            relocate_n(
                NonNull::new(dst.as_mut_ptr()).unwrap(),
                NonNull::new(src.as_ptr().cast_mut()).unwrap(),
                4,
            );
        }

        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn destroy_zero_values_is_noop() {
        let drops = Rc::new(Cell::new(0));
        let mut value = MaybeUninit::new(DropCounter {
            drops: Rc::clone(&drops),
        });

        unsafe {
            destroy_n(NonNull::new(value.as_mut_ptr()).unwrap(), 0);
        }
        assert_eq!(drops.get(), 0);

        unsafe {
            destroy_n(NonNull::new(value.as_mut_ptr()).unwrap(), 1);
        }
        assert_eq!(drops.get(), 1);
    }
}
