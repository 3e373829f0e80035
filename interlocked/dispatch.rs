// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time routing from a cell width in bytes to the word type and the
//! backend that implements it on the current target.
//!
//! | width | word   | backend                                        |
//! |-------|--------|------------------------------------------------|
//! | 1     | `u8`   | [`Selected`]                                   |
//! | 2     | `u16`  | [`Selected`]                                   |
//! | 4     | `u32`  | [`Selected`]                                   |
//! | 8     | `u64`  | [`Selected`], or `Emulated<Selected>` on 32-bit |
//! | 16    | `u128` | `Emulated<Cmpxchg16b>` with the `cas16` feature |
//!
//! Widths without an entry have no [`Dispatch`] implementation and cannot be
//! named.

use crate::backend::Backend;
use crate::word::Word;

#[cfg(interlocked_emulate_64)]
use crate::emulated::Emulated;

/// The backend used for every width that has a native primitive.
#[cfg(not(interlocked_native))]
pub type Selected = crate::builtin::Builtin;
/// The backend used for every width that has a native primitive.
#[cfg(interlocked_native)]
pub type Selected = crate::native::Native;

/// A cell width in bytes.
pub struct Width<const N: usize>;

/// Word and backend chosen for one [`Width`].
pub trait Dispatch {
    type Word: Word;
    type Backend: Backend<Self::Word>;
}

impl Dispatch for Width<1> {
    type Word = u8;
    type Backend = Selected;
}

impl Dispatch for Width<2> {
    type Word = u16;
    type Backend = Selected;
}

impl Dispatch for Width<4> {
    type Word = u32;
    type Backend = Selected;
}

#[cfg(all(target_has_atomic = "64", not(interlocked_emulate_64)))]
impl Dispatch for Width<8> {
    type Word = u64;
    type Backend = Selected;
}

#[cfg(interlocked_emulate_64)]
impl Dispatch for Width<8> {
    type Word = u64;
    type Backend = Emulated<Selected>;
}

#[cfg(interlocked_cas16)]
impl Dispatch for Width<16> {
    type Word = u128;
    type Backend = crate::emulated::Emulated<crate::wide::Cmpxchg16b>;
}

/// Expands `$body` once per supported width, with `$word` and `$backend`
/// naming that width's [`Dispatch`] choices, and evaluates the arm matching
/// `size_of::<$ty>()`.
///
/// Callers must have rejected unsupported sizes with
/// [`is_lock_free`](crate::is_lock_free) before reaching this.
macro_rules! dispatch {
    ($ty: ty, |$word: ident, $backend: ident| $body: expr) => {
        match ::core::mem::size_of::<$ty>() {
            1 => dispatch!(@arm 1, $word, $backend, $body),
            2 => dispatch!(@arm 2, $word, $backend, $body),
            4 => dispatch!(@arm 4, $word, $backend, $body),
            #[cfg(target_has_atomic = "64")]
            8 => dispatch!(@arm 8, $word, $backend, $body),
            #[cfg(interlocked_cas16)]
            16 => dispatch!(@arm 16, $word, $backend, $body),
            size => unreachable!("no atomic backend for {size}-byte values"),
        }
    };
    (@arm $n: literal, $word: ident, $backend: ident, $body: expr) => {{
        #[allow(dead_code)]
        type $word = <$crate::dispatch::Width<$n> as $crate::dispatch::Dispatch>::Word;
        #[allow(dead_code)]
        type $backend = <$crate::dispatch::Width<$n> as $crate::dispatch::Dispatch>::Backend;
        $body
    }};
}

pub(crate) use dispatch;

#[cfg(test)]
use core::ptr::NonNull;

#[cfg(test)]
fn width_of<const N: usize>() -> usize
where
    Width<N>: Dispatch,
{
    size_of::<<Width<N> as Dispatch>::Word>()
}

#[test]
fn test_word_matches_width() {
    assert_eq!(width_of::<1>(), 1);
    assert_eq!(width_of::<2>(), 2);
    assert_eq!(width_of::<4>(), 4);
    #[cfg(target_has_atomic = "64")]
    assert_eq!(width_of::<8>(), 8);
    #[cfg(interlocked_cas16)]
    assert_eq!(width_of::<16>(), 16);
}

#[test]
fn test_dispatch_selects_arm_by_size() {
    fn word_size<T>() -> usize {
        dispatch!(T, |W, B| size_of::<W>())
    }

    assert_eq!(word_size::<i8>(), 1);
    assert_eq!(word_size::<[u8; 2]>(), 2);
    assert_eq!(word_size::<f32>(), 4);
    #[cfg(target_has_atomic = "64")]
    assert_eq!(word_size::<(u32, u32)>(), 8);
}

#[test]
fn test_dispatched_backend_operates_on_cell() {
    use crate::backend::Backend;

    let foo = NonNull::from(Box::leak(Box::new(41u32)));

    // SAFETY: `foo` is a leaked, aligned, exclusively owned u32.
    let previous = unsafe {
        dispatch!(u32, |W, B| {
            let cell = foo.cast::<W>();
            bytemuck::cast::<W, u32>(B::fetch_add(cell, bytemuck::cast(1u32)))
        })
    };

    // SAFETY: `foo` is no longer shared.
    let foo = unsafe { Box::from_raw(foo.as_ptr()) };
    assert_eq!(previous, 41);
    assert_eq!(*foo, 42);
}
