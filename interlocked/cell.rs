// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;

use bytemuck::Pod;
#[cfg(test)]
use bytemuck::Zeroable;

use crate::word::Integer;

/// An owned atomic cell holding a `T`.
///
/// The cell is over-aligned so that every supported width is naturally
/// aligned, and all access while shared goes through the crate's atomic
/// operations. Using a method with a `T` whose size has no lock-free
/// backend fails to compile.
#[cfg_attr(not(interlocked_cas16), repr(C, align(8)))]
#[cfg_attr(interlocked_cas16, repr(C, align(16)))]
pub struct Atomic<T> {
    value: UnsafeCell<T>,
}

// SAFETY: every shared access to `value` is atomic.
unsafe impl<T: Pod + Send> Sync for Atomic<T> {}

macro_rules! gen_cell_rmw {
    ($($(#[$meta: meta])* $name: ident;)*) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $name(&self, operand: T) -> T {
                // SAFETY: the cell is owned, aligned and only shared atomically.
                unsafe { crate::$name(self.cell(), operand) }
            }
        )*
    };
}

impl<T> Atomic<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// The address of the cell, for use with the crate's free functions.
    pub const fn as_ptr(&self) -> *mut T {
        self.value.get()
    }

    /// Exclusive access needs no atomics.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Pod> Atomic<T> {
    #[inline(always)]
    fn cell(&self) -> NonNull<T> {
        // SAFETY: `UnsafeCell::get` never returns null.
        unsafe { NonNull::new_unchecked(self.value.get()) }
    }

    #[inline]
    pub fn load(&self) -> T {
        // SAFETY: the cell is owned, aligned and only shared atomically.
        unsafe { crate::load(self.cell()) }
    }

    #[inline]
    pub fn store(&self, value: T) {
        // SAFETY: the cell is owned, aligned and only shared atomically.
        unsafe { crate::store(self.cell(), value) }
    }

    /// Stores `value`, returning the previous value.
    #[inline]
    pub fn exchange(&self, value: T) -> T {
        // SAFETY: the cell is owned, aligned and only shared atomically.
        unsafe { crate::exchange(self.cell(), value) }
    }

    /// Stores `desired` iff the current value bit-equals `expected`.
    #[inline]
    pub fn compare_and_swap(&self, expected: T, desired: T) -> bool {
        // SAFETY: the cell is owned, aligned and only shared atomically.
        unsafe { crate::compare_and_swap(self.cell(), expected, desired) }
    }

    /// Like [`Atomic::compare_and_swap`], but always leaves the value the
    /// attempt observed in `expected`.
    #[inline]
    pub fn compare_and_swap_fetch(&self, expected: &mut T, desired: T) -> bool {
        // SAFETY: the cell is owned, aligned and only shared atomically.
        unsafe { crate::compare_and_swap_fetch(self.cell(), expected, desired) }
    }

    /// Like [`Atomic::compare_and_swap`], but returns the value the attempt
    /// observed.
    #[inline]
    pub fn compare_and_swap_value(&self, expected: T, desired: T) -> T {
        // SAFETY: the cell is owned, aligned and only shared atomically.
        unsafe { crate::compare_and_swap_value(self.cell(), expected, desired) }
    }
}

impl<T: Integer> Atomic<T> {
    gen_cell_rmw! {
        /// Adds `operand`, returning the previous value.
        fetch_add;
        /// Subtracts `operand`, returning the previous value.
        fetch_sub;
        fetch_and;
        fetch_or;
        fetch_xor;
        fetch_nand;
        /// Adds `operand`, returning the new value.
        add_fetch;
        /// Subtracts `operand`, returning the new value.
        sub_fetch;
        and_fetch;
        or_fetch;
        xor_fetch;
        nand_fetch;
    }

    /// Adds one, returning the new value.
    #[inline]
    pub fn increment(&self) -> T {
        self.add_fetch(T::one())
    }

    /// Subtracts one, returning the new value.
    #[inline]
    pub fn decrement(&self) -> T {
        self.sub_fetch(T::one())
    }

    /// Adds one, returning the previous value.
    #[inline]
    pub fn fetch_increment(&self) -> T {
        self.fetch_add(T::one())
    }

    /// Subtracts one, returning the previous value.
    #[inline]
    pub fn fetch_decrement(&self) -> T {
        self.fetch_sub(T::one())
    }
}

impl<T: Pod> Default for Atomic<T> {
    fn default() -> Self {
        Self::new(T::zeroed())
    }
}

impl<T: Pod> From<T> for Atomic<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Atomic").field(&self.load()).finish()
    }
}

#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Small {
    a: i8,
    b: u8,
    c: i16,
}

#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Medium {
    a: i16,
    b: u16,
    c: f32,
}

#[test]
fn test_int32() {
    let cell = Atomic::new(111i32);

    assert_eq!(cell.load(), 111);
    cell.store(222);
    assert_eq!(cell.load(), 222);
    assert_eq!(cell.exchange(333), 222);
    assert_eq!(cell.load(), 333);

    assert_eq!(cell.fetch_add(10), 333);
    assert_eq!(cell.add_fetch(10), 353);
    assert_eq!(cell.fetch_sub(50), 353);
    assert_eq!(cell.sub_fetch(3), 300);

    assert_eq!(cell.increment(), 301);
    assert_eq!(cell.fetch_increment(), 301);
    assert_eq!(cell.decrement(), 301);
    assert_eq!(cell.fetch_decrement(), 301);
    assert_eq!(cell.load(), 300);

    assert_eq!(cell.fetch_and(0x0F0), 300);
    assert_eq!(cell.fetch_or(0x001), 300 & 0x0F0);
    assert_eq!(cell.fetch_xor(0x0FF), (300 & 0x0F0) | 0x001);
    assert_eq!(cell.load(), ((300 & 0x0F0) | 0x001) ^ 0x0FF);

    assert!(cell.compare_and_swap(cell.load(), 7));
    assert!(!cell.compare_and_swap(8, 9));
    assert_eq!(cell.compare_and_swap_value(8, 9), 7);

    let mut expected = 8;
    assert!(!cell.compare_and_swap_fetch(&mut expected, 9));
    assert_eq!(expected, 7);
    assert!(cell.compare_and_swap_fetch(&mut expected, 9));
    assert_eq!(cell.into_inner(), 9);
}

#[test]
#[cfg(target_has_atomic = "64")]
fn test_uint64() {
    let cell = Atomic::new(0x7123_4567_89AB_CDEFu64);

    assert_eq!(cell.load(), 0x7123_4567_89AB_CDEF);
    assert_eq!(cell.exchange(0xFEDC_BA98_7654_3210), 0x7123_4567_89AB_CDEF);
    assert_eq!(cell.fetch_add(0x0123_4567_89AB_CDF0), 0xFEDC_BA98_7654_3210);
    assert_eq!(cell.load(), 0x0000_0000_0000_0000, "wraps");
    assert_eq!(cell.fetch_decrement(), 0);
    assert_eq!(cell.load(), u64::MAX);
    assert_eq!(cell.and_fetch(0xFFFF_0000_FFFF_0000), 0xFFFF_0000_FFFF_0000);
    assert_eq!(cell.or_fetch(0x00FF), 0xFFFF_0000_FFFF_00FF);
    assert_eq!(cell.xor_fetch(0xFFFF_FFFF_0000_0000), 0x0000_FFFF_FFFF_00FF);
    assert_eq!(cell.nand_fetch(0x0000_00FF_0000_00FF), !0x0000_00FF_0000_00FF);
    assert_eq!(cell.fetch_nand(0), !0x0000_00FF_0000_00FF);
    assert_eq!(cell.load(), u64::MAX);

    let mut expected = 0;
    assert!(!cell.compare_and_swap_fetch(&mut expected, 1));
    assert_eq!(expected, u64::MAX);
}

#[test]
fn test_signed_byte_and_half() {
    let byte = Atomic::new(-1i8);
    assert_eq!(byte.increment(), 0);
    assert_eq!(byte.decrement(), -1);
    assert_eq!(byte.fetch_add(i8::MIN), -1);
    assert_eq!(byte.load(), i8::MAX);

    let half = Atomic::<u16>::default();
    assert_eq!(half.fetch_decrement(), 0);
    assert_eq!(half.load(), u16::MAX);
}

#[test]
fn test_small_struct() {
    let zero = Small::zeroed();
    let value = Small { a: -12, b: 34, c: -5678 };
    let cell = Atomic::<Small>::default();

    assert_eq!(cell.load(), zero);
    cell.store(value);
    assert_eq!(cell.load(), value);
    assert_eq!(cell.exchange(zero), value);
    assert!(cell.compare_and_swap(zero, value));
    assert!(!cell.compare_and_swap(zero, value));

    let mut expected = zero;
    assert!(!cell.compare_and_swap_fetch(&mut expected, zero));
    assert_eq!(expected, value);
    assert!(cell.compare_and_swap_fetch(&mut expected, zero));
    assert_eq!(cell.load(), zero);
}

#[test]
#[cfg(target_has_atomic = "64")]
fn test_medium_struct() {
    let value = Medium { a: -1, b: 0xBEEF, c: 1.25 };
    let cell = Atomic::from(value);

    assert_eq!(cell.load(), value);
    assert_eq!(
        cell.compare_and_swap_value(Medium::zeroed(), Medium::zeroed()),
        value
    );
    assert_eq!(cell.exchange(Medium::zeroed()), value);
    assert_eq!(format!("{cell:?}"), "Atomic(Medium { a: 0, b: 0, c: 0.0 })");
}

#[test]
fn test_exclusive_access() {
    let mut cell = Atomic::new(1u32);
    *cell.get_mut() += 1;
    assert_eq!(cell.load(), 2);

    // SAFETY: the cell is not shared.
    unsafe {
        let ptr = NonNull::new_unchecked(cell.as_ptr());
        assert_eq!(crate::fetch_add(ptr, 1), 2);
    }
    assert_eq!(cell.into_inner(), 3);
}

#[test]
fn test_alignment() {
    assert!(align_of::<Atomic<u8>>() >= 8);
    assert_eq!(align_of::<Atomic<u64>>() % align_of::<u64>(), 0);
    #[cfg(interlocked_cas16)]
    assert_eq!(align_of::<Atomic<u128>>(), 16);
}

#[test]
fn test_pointer_access_needs_no_value_bound() {
    fn address_of<T>(cell: &Atomic<T>) -> NonNull<T> {
        NonNull::new(cell.as_ptr()).unwrap()
    }

    let cell = Atomic::new(5u16);
    // SAFETY: the cell is owned by this test and only accessed atomically.
    unsafe {
        assert_eq!(crate::exchange(address_of(&cell), 6), 5);
    }
    assert_eq!(cell.into_inner(), 6);
}

#[test]
fn test_increment_at_every_integer_type() {
    let byte = Atomic::new(u8::MAX);
    assert_eq!(byte.increment(), 0);
    assert_eq!(byte.fetch_decrement(), 0);
    assert_eq!(byte.load(), u8::MAX);

    let half = Atomic::new(i16::MIN);
    assert_eq!(half.decrement(), i16::MAX);
    assert_eq!(half.fetch_increment(), i16::MAX);
    assert_eq!(half.load(), i16::MIN);

    let size = Atomic::new(41usize);
    assert_eq!(size.increment(), 42);
    let signed = Atomic::new(0isize);
    assert_eq!(signed.decrement(), -1);
}
