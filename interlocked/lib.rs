// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lock-free atomic operations on caller-owned memory cells of 1, 2, 4, 8
//! and, with the `cas16` feature on x86_64, 16 bytes.
//!
//! The free functions in this crate take a raw cell address and a value of
//! any [`Pod`] type of a supported width. The width picks a backend at
//! compile time (see [`Dispatch`]); unsupported widths fail to compile.
//! Every operation is sequentially consistent.
//!
//! Read-modify-write operations come in two flavours that differ only in what
//! they return: `fetch_<op>` returns the value before the modification and
//! `<op>_fetch` the value after it. The latter is computed from the former,
//! so it is exactly the value this call wrote even if other threads have
//! modified the cell since.
//!
//! ```
//! use core::ptr::NonNull;
//!
//! let mut counter = 10u32;
//! let cell = NonNull::from(&mut counter);
//! // SAFETY: `counter` outlives every access and is not otherwise used.
//! unsafe {
//!     assert!(interlocked::compare_and_swap(cell, 10, 20));
//!     assert_eq!(interlocked::fetch_add(cell, 5), 20);
//!     assert_eq!(interlocked::sub_fetch(cell, 1), 24);
//! }
//! assert_eq!(counter, 24);
//! ```
//!
//! [`Atomic`] wraps a cell in an owning, safe type.
//!
//! # Safety
//!
//! Every function taking an `addr` requires that it is valid for reads and
//! writes of `T`, aligned to `size_of::<T>()`, and that every access to the
//! cell made while it is shared between threads goes through this crate or
//! another atomic API of the same width. Debug builds check the alignment.

use core::ptr::NonNull;

use bytemuck::Pod;

mod backend;
mod builtin;
mod cell;
mod dispatch;
mod emulated;
#[cfg(interlocked_native)]
mod native;
#[cfg(interlocked_cas16)]
mod wide;
mod word;

pub use backend::{Backend, Barrier, CompareExchange};
pub use builtin::Builtin;
pub use cell::Atomic;
pub use dispatch::{Dispatch, Selected, Width};
pub use emulated::Emulated;
#[cfg(interlocked_native)]
pub use native::Native;
#[cfg(interlocked_cas16)]
pub use wide::Cmpxchg16b;
pub use word::{Integer, Word};

use dispatch::dispatch;
use word::{from_word, to_word, word_cell};

/// Whether values of type `T` have a lock-free atomic backend on this build.
///
/// This is a property of `size_of::<T>()` alone: 1, 2 and 4 bytes always, 8
/// bytes where the target has 64-bit atomics and 16 bytes with the `cas16`
/// feature on x86_64. Every function in this crate refuses to compile for a
/// `T` for which this is `false`.
pub const fn is_lock_free<T>() -> bool {
    match size_of::<T>() {
        1 | 2 | 4 => true,
        8 => cfg!(target_has_atomic = "64"),
        16 => cfg!(interlocked_cas16),
        _ => false,
    }
}

macro_rules! assert_lock_free {
    ($ty: ty) => {
        const {
            assert!(
                is_lock_free::<$ty>(),
                "no lock-free atomic backend for a value of this size"
            )
        }
    };
}

/// Atomically reads the cell.
///
/// # Safety
///
/// See the [crate documentation](crate#safety).
#[inline(always)]
#[track_caller]
pub unsafe fn load<T: Pod>(addr: NonNull<T>) -> T {
    assert_lock_free!(T);
    dispatch!(T, |W, B| {
        let cell = word_cell::<T, W>(addr);
        // SAFETY: forwarded from the caller.
        from_word::<T, W>(unsafe { B::load(cell) })
    })
}

/// Atomically writes `value` to the cell.
///
/// # Safety
///
/// See the [crate documentation](crate#safety).
#[inline(always)]
#[track_caller]
pub unsafe fn store<T: Pod>(addr: NonNull<T>, value: T) {
    assert_lock_free!(T);
    dispatch!(T, |W, B| {
        let cell = word_cell::<T, W>(addr);
        // SAFETY: forwarded from the caller.
        unsafe { B::store(cell, to_word::<T, W>(value)) }
    })
}

/// Atomically writes `value` to the cell and returns the value it replaced.
///
/// # Safety
///
/// See the [crate documentation](crate#safety).
#[inline(always)]
#[track_caller]
pub unsafe fn exchange<T: Pod>(addr: NonNull<T>, value: T) -> T {
    assert_lock_free!(T);
    dispatch!(T, |W, B| {
        let cell = word_cell::<T, W>(addr);
        // SAFETY: forwarded from the caller.
        from_word::<T, W>(unsafe { B::exchange(cell, to_word::<T, W>(value)) })
    })
}

macro_rules! gen_rmw {
    ($(#[$meta: meta])* $name: ident) => {
        $(#[$meta])*
        ///
        /// # Safety
        ///
        /// See the [crate documentation](crate#safety).
        #[inline(always)]
        #[track_caller]
        pub unsafe fn $name<T: Integer>(addr: NonNull<T>, operand: T) -> T {
            assert_lock_free!(T);
            dispatch!(T, |W, B| {
                let cell = word_cell::<T, W>(addr);
                // SAFETY: forwarded from the caller.
                from_word::<T, W>(unsafe { B::$name(cell, to_word::<T, W>(operand)) })
            })
        }
    };
}

gen_rmw!(
    /// Atomically adds `operand` (wrapping) and returns the previous value.
    fetch_add
);
gen_rmw!(
    /// Atomically subtracts `operand` (wrapping) and returns the previous
    /// value.
    fetch_sub
);
gen_rmw!(
    /// Atomically ANDs in `operand` and returns the previous value.
    fetch_and
);
gen_rmw!(
    /// Atomically ORs in `operand` and returns the previous value.
    fetch_or
);
gen_rmw!(
    /// Atomically XORs in `operand` and returns the previous value.
    fetch_xor
);
gen_rmw!(
    /// Atomically replaces the value with `!(value & operand)` and returns the
    /// previous value.
    fetch_nand
);
gen_rmw!(
    /// Atomically adds `operand` (wrapping) and returns the sum written.
    add_fetch
);
gen_rmw!(
    /// Atomically subtracts `operand` (wrapping) and returns the difference
    /// written.
    sub_fetch
);
gen_rmw!(
    /// Atomically ANDs in `operand` and returns the value written.
    and_fetch
);
gen_rmw!(
    /// Atomically ORs in `operand` and returns the value written.
    or_fetch
);
gen_rmw!(
    /// Atomically XORs in `operand` and returns the value written.
    xor_fetch
);
gen_rmw!(
    /// Atomically replaces the value with `!(value & operand)` and returns
    /// the value written.
    nand_fetch
);

/// Writes `desired` iff the cell bit-equals `expected`, and reports whether
/// it did. The cell is not written on failure.
///
/// Comparison is on the bit pattern: for floats `-0.0` and `0.0` differ and
/// a NaN matches itself.
///
/// # Safety
///
/// See the [crate documentation](crate#safety).
#[inline(always)]
#[track_caller]
pub unsafe fn compare_and_swap<T: Pod>(addr: NonNull<T>, expected: T, desired: T) -> bool {
    assert_lock_free!(T);
    dispatch!(T, |W, B| {
        let cell = word_cell::<T, W>(addr);
        // SAFETY: forwarded from the caller.
        unsafe { B::compare_and_swap(cell, to_word::<T, W>(expected), to_word::<T, W>(desired)) }
    })
}

/// Like [`compare_and_swap`], but also stores the value the attempt observed
/// into `expected`, whether or not it succeeded.
///
/// # Safety
///
/// See the [crate documentation](crate#safety).
#[inline(always)]
#[track_caller]
pub unsafe fn compare_and_swap_fetch<T: Pod>(
    addr: NonNull<T>,
    expected: &mut T,
    desired: T,
) -> bool {
    assert_lock_free!(T);
    dispatch!(T, |W, B| {
        let cell = word_cell::<T, W>(addr);
        let mut observed = to_word::<T, W>(*expected);
        // SAFETY: forwarded from the caller.
        let swapped =
            unsafe { B::compare_and_swap_fetch(cell, &mut observed, to_word::<T, W>(desired)) };
        *expected = from_word::<T, W>(observed);
        swapped
    })
}

/// Attempts the same exchange as [`compare_and_swap`] and returns the value
/// the cell held before the attempt. The exchange happened iff that value
/// bit-equals `expected`.
///
/// # Safety
///
/// See the [crate documentation](crate#safety).
#[inline(always)]
#[track_caller]
pub unsafe fn compare_and_swap_value<T: Pod>(addr: NonNull<T>, expected: T, desired: T) -> T {
    assert_lock_free!(T);
    dispatch!(T, |W, B| {
        let cell = word_cell::<T, W>(addr);
        // SAFETY: forwarded from the caller.
        let previous =
            unsafe { B::compare_exchange(cell, to_word::<T, W>(expected), to_word::<T, W>(desired)) };
        from_word::<T, W>(previous)
    })
}

/// A full sequentially consistent fence.
#[inline(always)]
pub fn memory_barrier() {
    <Selected as Barrier>::memory_barrier();
}

/// Tells the processor that the caller is spinning on a retry loop.
#[inline(always)]
pub fn pause() {
    core::hint::spin_loop();
}

#[cfg(test)]
fn leak<T>(value: T) -> NonNull<T> {
    NonNull::from(Box::leak(Box::new(value)))
}

#[cfg(test)]
unsafe fn reclaim<T>(cell: NonNull<T>) -> T {
    // SAFETY: `cell` came from `leak` and is no longer shared.
    *unsafe { Box::from_raw(cell.as_ptr()) }
}

#[test]
fn test_is_lock_free() {
    assert!(is_lock_free::<u8>());
    assert!(is_lock_free::<i16>());
    assert!(is_lock_free::<f32>());
    assert!(is_lock_free::<[u8; 4]>());
    assert_eq!(is_lock_free::<u64>(), cfg!(target_has_atomic = "64"));
    assert_eq!(is_lock_free::<u128>(), cfg!(interlocked_cas16));
    assert!(!is_lock_free::<[u8; 3]>());
    assert!(!is_lock_free::<[u8; 12]>());
    assert!(!is_lock_free::<()>());
}

#[test]
fn test_exchange_then_load() {
    let cell = leak(1i32);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        assert_eq!(exchange(cell, 2), 1);
        assert_eq!(load(cell), 2);
        assert_eq!(load(cell), 2, "load is stable");
        assert_eq!(reclaim(cell), 2);
    }
}

#[test]
fn test_compare_and_swap() {
    let cell = leak(10u32);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        assert!(compare_and_swap(cell, 10, 20));
        assert_eq!(load(cell), 20);
        assert!(!compare_and_swap(cell, 10, 20));
        assert_eq!(load(cell), 20);
        assert_eq!(reclaim(cell), 20);
    }
}

#[test]
fn test_compare_and_swap_fetch() {
    let cell = leak(5u32);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        let mut expected = 3;
        assert!(!compare_and_swap_fetch(cell, &mut expected, 9));
        assert_eq!(expected, 5);
        assert_eq!(load(cell), 5);

        assert!(compare_and_swap_fetch(cell, &mut expected, 9));
        assert_eq!(expected, 5);
        assert_eq!(load(cell), 9);
        assert_eq!(reclaim(cell), 9);
    }
}

#[test]
fn test_compare_and_swap_value() {
    let cell = leak(-1i16);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        assert_eq!(compare_and_swap_value(cell, 0, 7), -1);
        assert_eq!(load(cell), -1);
        assert_eq!(compare_and_swap_value(cell, -1, 7), -1);
        assert_eq!(reclaim(cell), 7);
    }
}

#[test]
fn test_fetch_and_op_fetch_flavours() {
    let cell = leak(0i32);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        assert_eq!(fetch_add(cell, 5), 0);
        assert_eq!(load(cell), 5);
        assert_eq!(add_fetch(cell, 5), 10);
        assert_eq!(fetch_sub(cell, 15), 10);
        assert_eq!(load(cell), -5);
        assert_eq!(sub_fetch(cell, -6), 1);

        assert_eq!(fetch_or(cell, 0b0110), 1);
        assert_eq!(or_fetch(cell, 0b1000), 0b1111);
        assert_eq!(fetch_and(cell, 0b1010), 0b1111);
        assert_eq!(and_fetch(cell, 0b0011), 0b0010);
        assert_eq!(fetch_xor(cell, 0b0111), 0b0010);
        assert_eq!(xor_fetch(cell, 0b0101), 0b0000);
        assert_eq!(fetch_nand(cell, 0), 0);
        assert_eq!(load(cell), -1);
        assert_eq!(nand_fetch(cell, 0x0F), !0x0F);
        assert_eq!(reclaim(cell), !0x0F);
    }
}

#[test]
fn test_wrapping_at_every_width() {
    let byte = leak(i8::MAX);
    let half = leak(0u16);
    let word = leak(u32::MAX);

    // SAFETY: the cells are leaked, aligned and only accessed through this
    // crate.
    unsafe {
        assert_eq!(add_fetch(byte, 1), i8::MIN);
        assert_eq!(fetch_sub(half, 1), 0);
        assert_eq!(load(half), u16::MAX);
        assert_eq!(fetch_add(word, 2), u32::MAX);
        assert_eq!(load(word), 1);

        #[cfg(target_has_atomic = "64")]
        {
            let wide = leak(i64::MIN);
            assert_eq!(sub_fetch(wide, 1), i64::MAX);
            assert_eq!(reclaim(wide), i64::MAX);
        }

        reclaim(byte);
        reclaim(half);
        reclaim(word);
    }
}

#[test]
fn test_floats_compare_bitwise() {
    let cell = leak(0.0f32);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        assert!(!compare_and_swap(cell, -0.0, 1.0), "-0.0 is a different bit pattern");
        assert_eq!(load(cell).to_bits(), 0.0f32.to_bits());
        store(cell, f32::NAN);
        assert!(compare_and_swap(cell, f32::NAN, 2.5), "NaN matches its own bits");
        assert_eq!(exchange(cell, 0.5), 2.5);
        assert_eq!(reclaim(cell), 0.5);
    }
}

#[test]
fn test_composite_values() {
    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C, align(4))]
    struct Packed {
        a: i8,
        b: u8,
        c: i16,
    }

    let zero = Packed { a: 0, b: 0, c: 0 };
    let one = Packed { a: -1, b: 200, c: -300 };
    let cell = leak(zero);

    // SAFETY: `cell` is leaked, aligned and only accessed through this crate.
    unsafe {
        assert_eq!(load(cell), zero);
        store(cell, one);
        assert_eq!(load(cell), one);
        assert_eq!(exchange(cell, zero), one);

        let mut expected = one;
        assert!(!compare_and_swap_fetch(cell, &mut expected, one));
        assert_eq!(expected, zero);
        assert!(compare_and_swap(cell, zero, one));
        assert_eq!(compare_and_swap_value(cell, zero, zero), one);
        assert_eq!(reclaim(cell), one);
    }
}

#[test]
fn test_memory_barrier() {
    memory_barrier();
    pause();
}

#[test]
#[cfg(interlocked_cas16)]
fn test_sixteen_byte_cell() {
    let cell = leak(0u128);
    let pair = cell.cast::<[u64; 2]>();

    // SAFETY: `cell` is leaked, 16-byte aligned by `u128`'s layout and only
    // accessed through this crate.
    unsafe {
        store(pair, [u64::MAX, 0]);
        assert_eq!(load(pair), [u64::MAX, 0]);
        assert!(compare_and_swap(pair, [u64::MAX, 0], [1, 2]));
        assert_eq!(exchange(pair, [3, 4]), [1, 2]);
        assert_eq!(fetch_add(cell, 1), u128::from_ne_bytes(bytemuck::cast([3u64, 4])));
        assert_eq!(load(pair), [4, 4]);
        reclaim(cell);
    }
}

#[test]
#[cfg(all(interlocked_cas16, debug_assertions))]
#[should_panic(expected = "not aligned")]
fn test_sixteen_byte_cell_rejects_misaligned_address() {
    #[repr(C, align(16))]
    struct Buffer([u64; 4]);

    let mut buffer = Buffer([0; 4]);
    let base = NonNull::from(&mut buffer.0).cast::<[u64; 2]>();
    // SAFETY: the offset stays inside `buffer`, and the 8-byte offset makes
    // the cell misaligned for its 16-byte width.
    let misaligned = unsafe { base.cast::<u64>().add(1) }.cast::<[u64; 2]>();
    // SAFETY: the debug assertion fires before any access.
    unsafe { load(misaligned) };
}
