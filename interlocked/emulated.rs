// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry-loop emulation of the full operation set from a compare-exchange.
//!
//! 32-bit targets can compare-exchange 64 bits but have no native 64-bit
//! exchange or fetch-add, and `cmpxchg16b` is the only 16-byte instruction
//! x86_64 has. [`Emulated`] fills those gaps: every operation reads a guess,
//! computes the replacement and attempts to swap it in, retrying with the
//! value the failed attempt observed. There is no bound on the number of
//! retries and no yielding between them.
//!
//! Loads are compare-exchanges too, so every emulated operation, loads
//! included, writes the cell.

use core::convert::Infallible;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::backend::{Backend, Barrier, CompareExchange, private};
use crate::word::Word;

/// Runs `f` on the cell's value and swaps the result in, retrying until no
/// other thread intervened between the read and the swap. Returns the value
/// `f` was applied to.
///
/// `guess` only seeds the first attempt; a wrong guess costs one failed
/// compare-exchange and leaves the cell unmodified.
///
/// # Safety
///
/// See the [backend documentation](crate::backend).
#[inline(always)]
pub(crate) unsafe fn fetch_update<W, B>(ptr: NonNull<W>, guess: W, mut f: impl FnMut(W) -> W) -> W
where
    W: Word,
    B: CompareExchange<W> + ?Sized,
{
    let mut current = guess;
    loop {
        let new = f(current);
        // SAFETY: forwarded from the caller.
        let previous = unsafe { B::compare_exchange(ptr, current, new) };
        if previous == current {
            return current;
        }
        current = previous;
    }
}

/// A backend implemented purely on top of `B`'s compare-exchange.
pub struct Emulated<B>(PhantomData<B>, Infallible);

impl<B> private::Sealed for Emulated<B> {}

impl<W: Word, B: CompareExchange<W>> CompareExchange<W> for Emulated<B> {
    #[inline(always)]
    unsafe fn compare_exchange(ptr: NonNull<W>, current: W, new: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { B::compare_exchange(ptr, current, new) }
    }
}

impl<B: Barrier> Barrier for Emulated<B> {
    #[inline(always)]
    fn memory_barrier() {
        B::memory_barrier();
    }
}

impl<W: Word, B: CompareExchange<W> + Barrier> Backend<W> for Emulated<B> {
    /// A compare-exchange of zero for zero, so the load is a locked write
    /// cycle and the cell must be writable even when only read.
    #[inline(always)]
    unsafe fn load(ptr: NonNull<W>) -> W {
        // Swapping zero for zero never changes the cell but reports its value.
        // SAFETY: forwarded from the caller.
        unsafe { B::compare_exchange(ptr, W::zero(), W::zero()) }
    }

    #[inline(always)]
    unsafe fn store(ptr: NonNull<W>, val: W) {
        // SAFETY: forwarded from the caller.
        unsafe { Self::exchange(ptr, val) };
    }

    #[inline(always)]
    unsafe fn exchange(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |_| val) }
    }

    #[inline(always)]
    unsafe fn fetch_add(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |old| old.wrapping_add(&val)) }
    }

    #[inline(always)]
    unsafe fn fetch_sub(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |old| old.wrapping_sub(&val)) }
    }

    #[inline(always)]
    unsafe fn fetch_and(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |old| old & val) }
    }

    #[inline(always)]
    unsafe fn fetch_or(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |old| old | val) }
    }

    #[inline(always)]
    unsafe fn fetch_xor(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |old| old ^ val) }
    }

    #[inline(always)]
    unsafe fn fetch_nand(ptr: NonNull<W>, val: W) -> W {
        // SAFETY: forwarded from the caller.
        unsafe { fetch_update::<W, B>(ptr, W::zero(), |old| !(old & val)) }
    }
}

#[cfg(test)]
use crate::builtin::Builtin;

#[cfg(all(test, target_has_atomic = "64"))]
type Emulated64 = Emulated<Builtin>;

#[test]
#[cfg(target_has_atomic = "64")]
fn test_emulated_matches_builtin_single_threaded() {
    let foo = NonNull::from(Box::leak(Box::new(0xfff0_00f0_000f_f0ffu64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        assert_eq!(Emulated64::load(foo), 0xfff0_00f0_000f_f0ff);
        assert_eq!(Emulated64::load(foo), 0xfff0_00f0_000f_f0ff, "load is stable");

        assert_eq!(
            Emulated64::fetch_add(foo, 0x000f_f00f_f000_0f00),
            0xfff0_00f0_000f_f0ff
        );
        assert_eq!(Builtin::load(foo), 0xffff_f0ff_f00f_ffff);
        assert_eq!(
            Emulated64::fetch_sub(foo, 0x000f_f00f_f000_0f00),
            0xffff_f0ff_f00f_ffff
        );
        assert_eq!(Builtin::load(foo), 0xfff0_00f0_000f_f0ff);
        assert_eq!(
            Emulated64::fetch_or(foo, 0x00ff_00ff_00ff_00ff),
            0xfff0_00f0_000f_f0ff
        );
        assert_eq!(Builtin::load(foo), 0xffff_00ff_00ff_f0ff);
        assert_eq!(
            Emulated64::fetch_and(foo, 0xf0f0_f0f0_f0f0_f0f0),
            0xffff_00ff_00ff_f0ff
        );
        assert_eq!(Builtin::load(foo), 0xf0f0_00f0_00f0_f0f0);
        assert_eq!(
            Emulated64::fetch_xor(foo, 0xffff_0000_ffff_0000),
            0xf0f0_00f0_00f0_f0f0
        );
        assert_eq!(Builtin::load(foo), 0x0f0f_00f0_ff0f_f0f0);

        assert_eq!(
            Emulated64::add_fetch(foo, 0xf0f0_0000_00f0_0f00),
            0xffff_00f0_ffff_fff0
        );
        assert_eq!(
            Emulated64::sub_fetch(foo, 0x0f0f_0000_0f0f_0000),
            0xf0f0_00f0_f0f0_fff0
        );
        assert_eq!(
            Emulated64::nand_fetch(foo, 0xffff_ffff_0000_0000),
            0x0f0f_ff0f_ffff_ffff
        );

        assert_eq!(Emulated64::exchange(foo, 0), 0x0f0f_ff0f_ffff_ffff);
        assert_eq!(Emulated64::load(foo), 0);
        Emulated64::store(foo, u64::MAX);
        assert_eq!(Builtin::load(foo), u64::MAX);
        assert_eq!(Emulated64::fetch_add(foo, 1), u64::MAX, "wraps");
        assert_eq!(Builtin::load(foo), 0);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_emulated_load_leaves_cell_unmodified() {
    let foo = NonNull::from(Box::leak(Box::new(0u32)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u32.
    unsafe {
        assert_eq!(Emulated::<Builtin>::load(foo), 0);
        assert_eq!(foo.read(), 0);
        foo.write(7);
        assert_eq!(Emulated::<Builtin>::load(foo), 7);
        assert_eq!(foo.read(), 7);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_fetch_update_refreshes_a_wrong_guess() {
    let foo = NonNull::from(Box::leak(Box::new(40u16)));
    let mut applied_to = Vec::new();

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u16.
    unsafe {
        let previous = fetch_update::<u16, Builtin>(foo, 3, |old| {
            applied_to.push(old);
            old + 2
        });
        assert_eq!(previous, 40);
        assert_eq!(foo.read(), 42);

        let _ = Box::from_raw(foo.as_ptr());
    }

    assert_eq!(applied_to, [3, 40], "retries with the observed value");
}
