// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unsigned machine words that the backends operate on, and the bit casts
//! between a caller's value type and the word of matching width.

use core::fmt::Debug;
use core::ptr::NonNull;

use bytemuck::Pod;
use num_traits::{PrimInt, WrappingAdd, WrappingSub};

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
    impl Sealed for u128 {}

    pub trait SealedInteger {}
    impl SealedInteger for u8 {}
    impl SealedInteger for i8 {}
    impl SealedInteger for u16 {}
    impl SealedInteger for i16 {}
    impl SealedInteger for u32 {}
    impl SealedInteger for i32 {}
    impl SealedInteger for u64 {}
    impl SealedInteger for i64 {}
    impl SealedInteger for u128 {}
    impl SealedInteger for i128 {}
    impl SealedInteger for usize {}
    impl SealedInteger for isize {}
}

/// An unsigned integer exactly as wide as one atomic cell.
///
/// Every atomic operation is performed on a `Word`; the caller's value is
/// reinterpreted into it on the way in and back out on the way out.
pub trait Word:
    private::Sealed + PrimInt + WrappingAdd + WrappingSub + Pod + Debug + Send + Sync + 'static
{
}

impl Word for u8 {}
impl Word for u16 {}
impl Word for u32 {}
impl Word for u64 {}
impl Word for u128 {}

/// Primitive integer types, the value types that arithmetic and bitwise
/// atomic operations accept.
///
/// Arithmetic is two's-complement wrapping on the bit pattern, which gives
/// the same result for signed and unsigned interpretations.
pub trait Integer: private::SealedInteger + PrimInt + Pod {}

impl Integer for u8 {}
impl Integer for i8 {}
impl Integer for u16 {}
impl Integer for i16 {}
impl Integer for u32 {}
impl Integer for i32 {}
impl Integer for u64 {}
impl Integer for i64 {}
impl Integer for u128 {}
impl Integer for i128 {}
impl Integer for usize {}
impl Integer for isize {}

/// Reinterprets `value` as the word `W`. Sizes are checked by the facade
/// before this is reached.
#[inline(always)]
pub(crate) fn to_word<T: Pod, W: Word>(value: T) -> W {
    bytemuck::cast(value)
}

/// Reinterprets the word `W` back into the caller's type.
#[inline(always)]
pub(crate) fn from_word<T: Pod, W: Word>(word: W) -> T {
    bytemuck::cast(word)
}

/// Views the caller's cell as a cell of the matching word.
///
/// Debug builds check that the address is naturally aligned for the width:
/// every backend requires it, and for 16 bytes `cmpxchg16b` faults otherwise.
#[inline(always)]
#[track_caller]
pub(crate) fn word_cell<T, W: Word>(addr: NonNull<T>) -> NonNull<W> {
    let cell = addr.cast::<W>();
    debug_assert!(
        cell.as_ptr().addr() % size_of::<W>() == 0,
        "atomic cell at {:p} is not aligned to its {}-byte width",
        cell,
        size_of::<W>()
    );
    cell
}

#[test]
fn test_word_round_trip_preserves_bits() {
    let word: u32 = to_word(-1i32);
    assert_eq!(word, u32::MAX);
    assert_eq!(from_word::<i32, u32>(word), -1);

    let word: u32 = to_word(1.5f32);
    assert_eq!(word, 1.5f32.to_bits());
    assert_eq!(from_word::<f32, u32>(word), 1.5);

    let word: u16 = to_word([0x12u8, 0x34]);
    assert_eq!(word, u16::from_ne_bytes([0x12, 0x34]));
}

#[test]
fn test_word_cell_accepts_aligned_address() {
    let mut cell = 0u64;
    let addr = NonNull::from(&mut cell);
    assert_eq!(word_cell::<u64, u64>(addr), addr);
    assert_eq!(word_cell::<u64, u32>(addr).cast::<u64>(), addr);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "not aligned")]
fn test_word_cell_rejects_misaligned_address() {
    let mut cells = [0u32; 2];
    let misaligned = NonNull::from(&mut cells).cast::<u8>();
    // SAFETY: the offset stays inside `cells`.
    let misaligned = unsafe { misaligned.add(2) }.cast::<[u8; 4]>();
    let _ = word_cell::<[u8; 4], u32>(misaligned);
}
