// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 16-byte compare-exchange through `cmpxchg16b`.
//!
//! This is the only 16-byte primitive; the remaining operations at that width
//! are provided by [`Emulated<Cmpxchg16b>`](crate::Emulated). The instruction
//! faults on an address that is not 16-byte aligned.

use core::arch::asm;
use core::convert::Infallible;
use core::ptr::NonNull;
use core::sync::atomic::Ordering::SeqCst;
use core::sync::atomic::fence;

use crate::backend::{Barrier, CompareExchange, private};

/// `lock cmpxchg16b`.
pub enum Cmpxchg16b {
    #[doc(hidden)]
    _Never(Infallible),
}

impl private::Sealed for Cmpxchg16b {}

impl Barrier for Cmpxchg16b {
    #[inline(always)]
    fn memory_barrier() {
        fence(SeqCst);
    }
}

impl CompareExchange<u128> for Cmpxchg16b {
    #[inline(always)]
    unsafe fn compare_exchange(ptr: NonNull<u128>, current: u128, new: u128) -> u128 {
        debug_assert!(
            std::arch::is_x86_feature_detected!("cmpxchg16b"),
            "the cas16 feature requires a CPU with cmpxchg16b"
        );
        let (previous_lo, previous_hi): (u64, u64);
        // `rbx` is reserved by the compiler and cannot be an operand, so the
        // low half of `new` is swapped into it and its value restored after.
        // SAFETY: the caller guarantees the cell is valid, 16-byte aligned and
        // only accessed atomically while shared.
        unsafe {
            asm!(
                "xchg {rbx_tmp}, rbx",
                "lock cmpxchg16b xmmword ptr [{ptr}]",
                "mov rbx, {rbx_tmp}",
                rbx_tmp = inout(reg) new as u64 => _,
                ptr = in(reg) ptr.as_ptr(),
                in("rcx") (new >> 64) as u64,
                inout("rax") current as u64 => previous_lo,
                inout("rdx") (current >> 64) as u64 => previous_hi,
                options(nostack)
            );
        }
        (u128::from(previous_hi) << 64) | u128::from(previous_lo)
    }
}

#[cfg(test)]
use crate::backend::Backend;
#[cfg(test)]
use crate::emulated::Emulated;

#[cfg(test)]
type Wide = Emulated<Cmpxchg16b>;

#[test]
fn test_compare_exchange() {
    let foo = NonNull::from(Box::leak(Box::new(0u128)));
    let high = 1u128 << 64;

    // SAFETY: `foo` is a leaked, 16-byte aligned, exclusively owned u128.
    unsafe {
        assert_eq!(Cmpxchg16b::compare_exchange(foo, high, 7), 0);
        assert_eq!(foo.read(), 0, "failed attempt leaves the cell alone");
        assert_eq!(Cmpxchg16b::compare_exchange(foo, 0, high | 7), 0);
        assert_eq!(foo.read(), high | 7);
        assert_eq!(Cmpxchg16b::compare_exchange(foo, 7, 0), high | 7, "both halves compared");
        assert_eq!(foo.read(), high | 7);

        let _ = Box::from_raw(foo.as_ptr());
    }
}

#[test]
fn test_emulated_operations() {
    let foo = NonNull::from(Box::leak(Box::new(u64::MAX as u128)));

    // SAFETY: `foo` is a leaked, 16-byte aligned, exclusively owned u128.
    unsafe {
        assert_eq!(Wide::load(foo), u64::MAX as u128);
        assert_eq!(Wide::fetch_add(foo, 1), u64::MAX as u128);
        assert_eq!(Wide::load(foo), 1 << 64, "carries into the high half");
        assert_eq!(Wide::sub_fetch(foo, 1), u64::MAX as u128);
        assert_eq!(Wide::exchange(foo, u128::MAX), u64::MAX as u128);
        assert_eq!(Wide::fetch_and(foo, 1 << 100), u128::MAX);
        assert_eq!(Wide::or_fetch(foo, 1), (1 << 100) | 1);
        assert_eq!(Wide::xor_fetch(foo, 1), 1 << 100);
        assert_eq!(Wide::fetch_nand(foo, 1 << 100), 1 << 100);
        assert_eq!(Wide::load(foo), !(1u128 << 100));
        Wide::store(foo, 0);
        assert_eq!(foo.read(), 0);

        let _ = Box::from_raw(foo.as_ptr());
    }
}
