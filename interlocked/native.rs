// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backend over the x86 interlocked instruction family, written directly as
//! inline assembly.
//!
//! The mapping to sequential consistency is the usual one for x86: plain
//! `mov` loads, `xchg` stores (which carry an implicit `lock`), `lock`-prefixed
//! read-modify-writes and `mfence` for standalone fences. Each width uses the
//! instruction form of exactly that width, so narrow cells never touch the
//! bytes around them.
//!
//! x86 has no bitwise instruction that returns the previous value, so
//! and/or/xor/nand loop on `lock cmpxchg`, as compilers do.

use core::arch::asm;
use core::convert::Infallible;
use core::ptr::NonNull;

use crate::backend::{Backend, Barrier, CompareExchange, private};
use crate::emulated::fetch_update;

/// Hand-written `lock`-prefixed x86 instructions.
pub enum Native {
    #[doc(hidden)]
    _Never(Infallible),
}

impl private::Sealed for Native {}

impl Barrier for Native {
    #[inline(always)]
    fn memory_barrier() {
        // SAFETY: `mfence` only orders memory accesses.
        unsafe { asm!("mfence", options(nostack, preserves_flags)) };
    }
}

// `$class` is the register class for the width, `$modifier` the template
// modifier naming the sub-register of that width and `$acc` the accumulator
// that `cmpxchg` compares against.
macro_rules! gen_native {
    ($word: ty, $class: tt, $modifier: tt, $acc: tt) => {
        impl CompareExchange<$word> for Native {
            #[inline(always)]
            unsafe fn compare_exchange(ptr: NonNull<$word>, current: $word, new: $word) -> $word {
                let previous: $word;
                // SAFETY: the caller guarantees the cell is valid, aligned and
                // only accessed atomically while shared.
                unsafe {
                    asm!(
                        concat!("lock cmpxchg [{ptr}], {new", $modifier, "}"),
                        ptr = in(reg) ptr.as_ptr(),
                        new = in($class) new,
                        inout($acc) current => previous,
                        options(nostack)
                    );
                }
                previous
            }
        }

        impl Backend<$word> for Native {
            #[inline(always)]
            unsafe fn load(ptr: NonNull<$word>) -> $word {
                let val: $word;
                // SAFETY: see `compare_exchange`.
                unsafe {
                    asm!(
                        concat!("mov {val", $modifier, "}, [{ptr}]"),
                        ptr = in(reg) ptr.as_ptr(),
                        val = lateout($class) val,
                        options(nostack, preserves_flags)
                    );
                }
                val
            }

            #[inline(always)]
            unsafe fn store(ptr: NonNull<$word>, val: $word) {
                // SAFETY: see `compare_exchange`.
                unsafe {
                    asm!(
                        concat!("xchg [{ptr}], {val", $modifier, "}"),
                        ptr = in(reg) ptr.as_ptr(),
                        val = inout($class) val => _,
                        options(nostack, preserves_flags)
                    );
                }
            }

            #[inline(always)]
            unsafe fn exchange(ptr: NonNull<$word>, val: $word) -> $word {
                let previous: $word;
                // SAFETY: see `compare_exchange`.
                unsafe {
                    asm!(
                        concat!("xchg [{ptr}], {val", $modifier, "}"),
                        ptr = in(reg) ptr.as_ptr(),
                        val = inout($class) val => previous,
                        options(nostack, preserves_flags)
                    );
                }
                previous
            }

            #[inline(always)]
            unsafe fn fetch_add(ptr: NonNull<$word>, val: $word) -> $word {
                let previous: $word;
                // SAFETY: see `compare_exchange`.
                unsafe {
                    asm!(
                        concat!("lock xadd [{ptr}], {val", $modifier, "}"),
                        ptr = in(reg) ptr.as_ptr(),
                        val = inout($class) val => previous,
                        options(nostack)
                    );
                }
                previous
            }

            // There is no `lock xsub`; add the negated value.
            #[inline(always)]
            unsafe fn fetch_sub(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: forwarded from the caller.
                unsafe { Self::fetch_add(ptr, val.wrapping_neg()) }
            }

            #[inline(always)]
            unsafe fn fetch_and(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: forwarded from the caller.
                unsafe { fetch_update::<$word, Self>(ptr, Self::load(ptr), |old| old & val) }
            }

            #[inline(always)]
            unsafe fn fetch_or(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: forwarded from the caller.
                unsafe { fetch_update::<$word, Self>(ptr, Self::load(ptr), |old| old | val) }
            }

            #[inline(always)]
            unsafe fn fetch_xor(ptr: NonNull<$word>, val: $word) -> $word {
                // SAFETY: forwarded from the caller.
                unsafe { fetch_update::<$word, Self>(ptr, Self::load(ptr), |old| old ^ val) }
            }
        }
    };
}

gen_native!(u8, reg_byte, "", "al");
gen_native!(u16, reg, ":x", "ax");
gen_native!(u32, reg, ":e", "eax");
#[cfg(target_arch = "x86_64")]
gen_native!(u64, reg, ":r", "rax");

// 32-bit x86 reaches 64 bits only through `cmpxchg8b`, whose fixed use of
// `ebx` inline assembly cannot name. Borrow the compiler's lowering for the
// one primitive the emulation needs.
#[cfg(target_arch = "x86")]
impl CompareExchange<u64> for Native {
    #[inline(always)]
    unsafe fn compare_exchange(ptr: NonNull<u64>, current: u64, new: u64) -> u64 {
        // SAFETY: forwarded from the caller.
        unsafe { <crate::builtin::Builtin as CompareExchange<u64>>::compare_exchange(ptr, current, new) }
    }
}

#[test]
fn test_load() {
    let foo = NonNull::from(Box::leak(Box::new(0xFFFF_FFFF_FFFF_FFFFu64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        assert_eq!(Native::load(foo.cast::<u8>()), 0xFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        assert_eq!(Native::load(foo.cast::<u16>()), 0xFFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        assert_eq!(Native::load(foo.cast::<u32>()), 0xFFFF_FFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        #[cfg(target_arch = "x86_64")]
        assert_eq!(Native::load(foo), 0xFFFF_FFFF_FFFF_FFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_store() {
    let foo = NonNull::from(Box::leak(Box::new(0u64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        Native::store(foo.cast::<u8>(), 0xFF);
        assert_eq!(Native::load(foo.cast::<u8>()), 0xFF);
        assert_eq!(foo.read(), 0xFF);

        Native::store(foo.cast::<u16>(), 0xFFFF);
        assert_eq!(Native::load(foo.cast::<u16>()), 0xFFFF);
        assert_eq!(foo.read(), 0xFFFF);

        Native::store(foo.cast::<u32>(), 0xFFFF_FFFF);
        assert_eq!(Native::load(foo.cast::<u32>()), 0xFFFF_FFFF);
        assert_eq!(foo.read(), 0xFFFF_FFFF);

        #[cfg(target_arch = "x86_64")]
        {
            Native::store(foo, 0xFFFF_FFFF_FFFF_FFFF);
            assert_eq!(Native::load(foo), 0xFFFF_FFFF_FFFF_FFFF);
            assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

            Native::store(foo, 0x0);
            assert_eq!(Native::load(foo), 0x0);
            assert_eq!(foo.read(), 0x0);
        }

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_exchange() {
    let foo = NonNull::from(Box::leak(Box::new(0u64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        assert_eq!(Native::exchange(foo.cast::<u8>(), 0xFF), 0, "u8 initial");
        assert_eq!(Native::exchange(foo.cast::<u8>(), 0), 0xFF, "u8 subsequent");
        assert_eq!(foo.read(), 0);

        assert_eq!(Native::exchange(foo.cast::<u16>(), 0xFFFF), 0, "u16 initial");
        assert_eq!(foo.read(), 0xFFFF);
        assert_eq!(Native::exchange(foo.cast::<u16>(), 0), 0xFFFF, "u16 subsequent");
        assert_eq!(foo.read(), 0);

        assert_eq!(
            Native::exchange(foo.cast::<u32>(), 0xFFFF_FFFF),
            0,
            "u32 initial"
        );
        assert_eq!(
            Native::exchange(foo.cast::<u32>(), 0),
            0xFFFF_FFFF,
            "u32 subsequent"
        );
        assert_eq!(foo.read(), 0);

        #[cfg(target_arch = "x86_64")]
        {
            assert_eq!(
                Native::exchange(foo, 0xFFFF_FFFF_FFFF_FFFF),
                0,
                "u64 initial"
            );
            assert_eq!(
                Native::exchange(foo, 0),
                0xFFFF_FFFF_FFFF_FFFF,
                "u64 subsequent"
            );
            assert_eq!(foo.read(), 0);
        }

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_compare_exchange() {
    let foo = NonNull::from(Box::leak(Box::new(0u64)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u64.
    unsafe {
        let byte = foo.cast::<u8>();
        assert_eq!(Native::compare_exchange(byte, 0xFF, 0xFF), 0, "u8 initial");
        assert_eq!(foo.read(), 0);
        assert_eq!(Native::compare_exchange(byte, 0, 0xFF), 0, "u8 initial");
        assert_eq!(foo.read(), 0xFF);
        assert_eq!(Native::compare_exchange(byte, 0, 0), 0xFF, "u8 subsequent");
        assert_eq!(foo.read(), 0xFF);
        assert_eq!(Native::compare_exchange(byte, 0xFF, 0), 0xFF, "u8 subsequent");
        assert_eq!(foo.read(), 0);

        let half = foo.cast::<u16>();
        assert_eq!(Native::compare_exchange(half, 0xFFFF, 0xFFFF), 0, "u16 initial");
        assert_eq!(foo.read(), 0);
        assert_eq!(Native::compare_exchange(half, 0, 0xFFFF), 0, "u16 initial");
        assert_eq!(foo.read(), 0xFFFF);
        assert_eq!(Native::compare_exchange(half, 0xFFFF, 0), 0xFFFF, "u16 subsequent");
        assert_eq!(foo.read(), 0);

        let word = foo.cast::<u32>();
        assert!(Native::compare_and_swap(word, 0, 10));
        assert!(Native::compare_and_swap(word, 10, 20));
        assert_eq!(Native::load(word), 20);
        assert!(!Native::compare_and_swap(word, 10, 20));
        assert_eq!(Native::load(word), 20);

        let mut expected = 3;
        assert!(!Native::compare_and_swap_fetch(word, &mut expected, 9));
        assert_eq!(expected, 20);
        assert_eq!(Native::load(word), 20);

        foo.write(0);
        assert_eq!(
            Native::compare_exchange(foo, 0, 0xFFFF_FFFF_FFFF_FFFF),
            0,
            "u64"
        );
        assert_eq!(foo.read(), 0xFFFF_FFFF_FFFF_FFFF);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_fetch_ops_match_builtin() {
    use crate::builtin::Builtin;

    let native = NonNull::from(Box::leak(Box::new(0x5Au8)));
    let builtin = NonNull::from(Box::leak(Box::new(0x5Au8)));

    // SAFETY: both cells are leaked, aligned and exclusively owned.
    unsafe {
        for operand in [0u8, 1, 0x0F, 0x80, 0xA5, 0xFF] {
            assert_eq!(Native::fetch_add(native, operand), Builtin::fetch_add(builtin, operand));
            assert_eq!(Native::fetch_sub(native, operand), Builtin::fetch_sub(builtin, operand));
            assert_eq!(Native::fetch_and(native, !operand), Builtin::fetch_and(builtin, !operand));
            assert_eq!(Native::fetch_or(native, operand), Builtin::fetch_or(builtin, operand));
            assert_eq!(Native::fetch_xor(native, operand), Builtin::fetch_xor(builtin, operand));
            assert_eq!(Native::fetch_nand(native, operand), Builtin::fetch_nand(builtin, operand));
            assert_eq!(Native::add_fetch(native, operand), Builtin::add_fetch(builtin, operand));
            assert_eq!(native.read(), builtin.read());
        }

        let _ = Box::from_raw(native.as_ptr());
        let _ = Box::from_raw(builtin.as_ptr());
    }
}

#[test]
fn test_memory_barrier() {
    Native::memory_barrier();
}
