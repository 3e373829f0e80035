// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backend over the compiler's atomic builtins, reached through
//! `core::sync::atomic`. This is the default backend on every target.

use core::convert::Infallible;
use core::ptr::NonNull;
use core::sync::atomic::Ordering::SeqCst;
use core::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, fence};

#[cfg(target_has_atomic = "64")]
use core::sync::atomic::AtomicU64;

use crate::backend::{Backend, Barrier, CompareExchange, private};

/// Compiler atomic builtins.
pub enum Builtin {
    #[doc(hidden)]
    _Never(Infallible),
}

impl private::Sealed for Builtin {}

impl Barrier for Builtin {
    #[inline(always)]
    fn memory_barrier() {
        fence(SeqCst);
    }
}

macro_rules! gen_builtin {
    ($word: ty, $atomic: ty) => {
        impl CompareExchange<$word> for Builtin {
            #[inline(always)]
            unsafe fn compare_exchange(ptr: NonNull<$word>, current: $word, new: $word) -> $word {
                // SAFETY: the caller guarantees the cell is valid, aligned and
                // only accessed atomically while shared.
                let cell = unsafe { <$atomic>::from_ptr(ptr.as_ptr()) };
                match cell.compare_exchange(current, new, SeqCst, SeqCst) {
                    Ok(previous) | Err(previous) => previous,
                }
            }
        }

        impl Backend<$word> for Builtin {
            #[inline(always)]
            unsafe fn load(ptr: NonNull<$word>) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.load(SeqCst)
            }

            #[inline(always)]
            unsafe fn store(ptr: NonNull<$word>, val: $word) {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.store(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn exchange(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.swap(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn fetch_add(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.fetch_add(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn fetch_sub(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.fetch_sub(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn fetch_and(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.fetch_and(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn fetch_or(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.fetch_or(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn fetch_xor(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.fetch_xor(val, SeqCst)
            }

            #[inline(always)]
            unsafe fn fetch_nand(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: see `compare_exchange`.
                unsafe { <$atomic>::from_ptr(ptr.as_ptr()) }.fetch_nand(val, SeqCst)
            }
        }
    };
}

gen_builtin!(u8, AtomicU8);
gen_builtin!(u16, AtomicU16);
gen_builtin!(u32, AtomicU32);
// On 32-bit targets the 64-bit read-modify-write methods are themselves
// lowered to CAS loops; the width dispatcher routes that width through
// `Emulated<Builtin>` there and only relies on `compare_exchange`.
#[cfg(target_has_atomic = "64")]
gen_builtin!(u64, AtomicU64);

#[test]
fn test_load() {
    let foo = NonNull::from(Box::leak(Box::new(0xFFFF_FFFF_FFFF_FFFFu64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64; narrower
    // views start at the same address.
    unsafe {
        assert_eq!(Builtin::load(foo.cast::<u8>()), 0xFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        assert_eq!(Builtin::load(foo.cast::<u16>()), 0xFFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        assert_eq!(Builtin::load(foo.cast::<u32>()), 0xFFFF_FFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        #[cfg(target_has_atomic = "64")]
        assert_eq!(Builtin::load(foo), 0xFFFF_FFFF_FFFF_FFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_narrow_store_does_not_touch_neighbours() {
    let foo = NonNull::from(Box::leak(Box::new(0u64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        let bytes = foo.cast::<u8>();
        Builtin::store(bytes.add(1), 0xAB_u8);
        assert_eq!(foo.read().to_ne_bytes(), [0, 0xAB, 0, 0, 0, 0, 0, 0]);

        let halves = foo.cast::<u16>();
        assert_eq!(Builtin::exchange(halves.add(2), 0xBEEF_u16), 0);
        let mut expected = [0, 0xAB, 0, 0, 0, 0, 0, 0];
        expected[4..6].copy_from_slice(&0xBEEF_u16.to_ne_bytes());
        assert_eq!(foo.read().to_ne_bytes(), expected);
        assert_eq!(Builtin::load(bytes.add(1)), 0xAB);
        assert_eq!(Builtin::load(halves.add(2)), 0xBEEF);
        assert_eq!(Builtin::load(halves.add(3)), 0);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_fetch_ops_return_previous_value() {
    let foo = NonNull::from(Box::leak(Box::new(456u32)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u32.
    unsafe {
        assert_eq!(Builtin::fetch_add(foo, 100), 456);
        assert_eq!(foo.read(), 556);
        assert_eq!(Builtin::fetch_sub(foo, 200), 556);
        assert_eq!(foo.read(), 356);
        assert_eq!(Builtin::fetch_or(foo, 0xf0), 356);
        assert_eq!(foo.read(), 500);
        assert_eq!(Builtin::fetch_and(foo, 56), 500);
        assert_eq!(foo.read(), 48);
        assert_eq!(Builtin::fetch_xor(foo, 0xfc), 48);
        assert_eq!(foo.read(), 204);
        assert_eq!(Builtin::fetch_nand(foo, 0xff), 204);
        assert_eq!(foo.read(), !204);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_op_fetch_returns_applied_value() {
    let foo = NonNull::from(Box::leak(Box::new(204u32)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u32.
    unsafe {
        assert_eq!(Builtin::add_fetch(foo, 123), 327);
        assert_eq!(Builtin::sub_fetch(foo, 321), 6);
        assert_eq!(Builtin::or_fetch(foo, 20), 22);
        assert_eq!(Builtin::and_fetch(foo, 28), 20);
        assert_eq!(Builtin::xor_fetch(foo, 0xff), 235);
        assert_eq!(Builtin::nand_fetch(foo, 0x0f), !(235 & 0x0f));
        assert_eq!(foo.read(), !(235 & 0x0f));

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_compare_exchange() {
    let foo = NonNull::from(Box::leak(Box::new(0u64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        let byte = foo.cast::<u8>();
        assert_eq!(Builtin::compare_exchange(byte, 0xFF, 0xFF), 0, "u8 initial");
        assert_eq!(foo.read(), 0);
        assert_eq!(Builtin::compare_exchange(byte, 0, 0xFF), 0, "u8 initial");
        assert_eq!(foo.read(), 0xFF);
        assert_eq!(Builtin::compare_exchange(byte, 0, 0), 0xFF, "u8 subsequent");
        assert_eq!(foo.read(), 0xFF);
        assert_eq!(Builtin::compare_exchange(byte, 0xFF, 0), 0xFF, "u8 subsequent");
        assert_eq!(foo.read(), 0);

        let word = foo.cast::<u32>();
        assert!(Builtin::compare_and_swap(word, 0, 10));
        assert!(Builtin::compare_and_swap(word, 10, 20));
        assert_eq!(Builtin::load(word), 20);
        assert!(!Builtin::compare_and_swap(word, 10, 20));
        assert_eq!(Builtin::load(word), 20);

        let mut expected = 3;
        assert!(!Builtin::compare_and_swap_fetch(word, &mut expected, 9));
        assert_eq!(expected, 20, "refreshed on failure");
        assert!(Builtin::compare_and_swap_fetch(word, &mut expected, 9));
        assert_eq!(expected, 20, "refreshed on success");
        assert_eq!(Builtin::load(word), 9);

        #[cfg(target_has_atomic = "64")]
        {
            foo.write(9);
            assert_eq!(
                Builtin::compare_exchange(foo, 9, 0xFFFF_FFFF_FFFF_FFFF),
                9,
                "u64"
            );
            assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);
        }

        let _ = Box::from_raw(foo.as_ptr());
    }
}
