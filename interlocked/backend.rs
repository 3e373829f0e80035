// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The operation set every backend provides for each width it supports.
//!
//! A backend is an uninhabited tag type. It implements [`CompareExchange`]
//! and [`Backend`] once per supported [`Word`], so the choice of
//! implementation is made entirely by type resolution.
//!
//! All operations are sequentially consistent.
//!
//! # Safety
//!
//! Every function taking a cell requires that `ptr` is valid for reads and
//! writes of `W`, aligned to `size_of::<W>()`, and that every access to the
//! cell made while it is shared between threads is atomic.

use core::ptr::NonNull;

use crate::word::Word;

pub(crate) mod private {
    pub trait Sealed {}
}

/// The single primitive that the retry emulation is built from.
pub trait CompareExchange<W: Word>: private::Sealed {
    /// If the cell holds `current`, replaces it with `new`. Always returns the
    /// value the cell held immediately before the attempt; the exchange
    /// happened iff that value equals `current`.
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn compare_exchange(ptr: NonNull<W>, current: W, new: W) -> W;
}

/// A full fence, independent of any cell.
pub trait Barrier: private::Sealed {
    fn memory_barrier();
}

/// The complete primitive operation set of one backend at width `W`.
///
/// Op-fetch flavours and the boolean CAS forms are provided on top of the
/// required primitives: the post-value is always computed from the returned
/// pre-value and the operand, never by reading the cell a second time.
pub trait Backend<W: Word>: CompareExchange<W> + Barrier {
    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn load(ptr: NonNull<W>) -> W;

    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn store(ptr: NonNull<W>, val: W);

    /// Stores `val` and returns the value it replaced.
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn exchange(ptr: NonNull<W>, val: W) -> W;

    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn fetch_add(ptr: NonNull<W>, val: W) -> W;

    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn fetch_sub(ptr: NonNull<W>, val: W) -> W;

    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn fetch_and(ptr: NonNull<W>, val: W) -> W;

    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn fetch_or(ptr: NonNull<W>, val: W) -> W;

    /// # Safety
    ///
    /// See the [module documentation](self).
    unsafe fn fetch_xor(ptr: NonNull<W>, val: W) -> W;

    /// Stores `!(old & val)` and returns `old`.
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn fetch_nand(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        let current = unsafe { Self::load(ptr) };
        // SAFETY: forwarded from the caller.
        unsafe { crate::emulated::fetch_update::<W, Self>(ptr, current, |old| !(old & val)) }
    }

    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn add_fetch(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { Self::fetch_add(ptr, val) }.wrapping_add(&val)
    }

    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn sub_fetch(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { Self::fetch_sub(ptr, val) }.wrapping_sub(&val)
    }

    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn and_fetch(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        let previous = unsafe { Self::fetch_and(ptr, val) };
        previous & val
    }

    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn or_fetch(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        let previous = unsafe { Self::fetch_or(ptr, val) };
        previous | val
    }

    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn xor_fetch(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        let previous = unsafe { Self::fetch_xor(ptr, val) };
        previous ^ val
    }

    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn nand_fetch(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        !(unsafe { Self::fetch_nand(ptr, val) } & val)
    }

    /// Writes `desired` iff the cell bit-equals `expected`.
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn compare_and_swap(ptr: NonNull<W>, expected: W, desired: W) -> bool {
        // SAFETY: forwarded from the caller.
        unsafe { Self::compare_exchange(ptr, expected, desired) == expected }
    }

    /// Like [`Backend::compare_and_swap`], but `expected` is overwritten with
    /// the value the attempt observed whether or not it succeeded.
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    #[inline(always)]
    unsafe fn compare_and_swap_fetch(ptr: NonNull<W>, expected: &mut W, desired: W) -> bool {
        // SAFETY: forwarded from the caller.
        let previous = unsafe { Self::compare_exchange(ptr, *expected, desired) };
        let swapped = previous == *expected;
        *expected = previous;
        swapped
    }
}

#[test]
fn test_bitwise_op_fetch_applies_operand_to_previous_value() {
    use crate::builtin::Builtin;

    let foo = NonNull::from(Box::leak(Box::new(0b1100u8)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u8.
    unsafe {
        assert_eq!(Builtin::and_fetch(foo, 0b1010), 0b1000);
        assert_eq!(foo.read(), 0b1000);
        assert_eq!(Builtin::or_fetch(foo, 0b0011), 0b1011);
        assert_eq!(foo.read(), 0b1011);
        assert_eq!(Builtin::xor_fetch(foo, 0b1111), 0b0100);
        assert_eq!(foo.read(), 0b0100);
        assert_eq!(Builtin::nand_fetch(foo, 0b0100), !0b0100);
        assert_eq!(foo.read(), !0b0100);

        let _ = Box::from_raw(foo.as_ptr());
    }
}
