// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ptr::NonNull;
use std::thread;

use interlocked::{Atomic, Backend, Builtin, Emulated};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const THREADS: usize = 8;
const ITERATIONS: usize = 10_000;

fn cell_of<T>(cell: &Atomic<T>) -> NonNull<T> {
    NonNull::new(cell.as_ptr()).unwrap()
}

#[test]
fn fetch_add_from_many_threads_is_exact() {
    let counter = Atomic::new(0u32);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let ptr = cell_of(&counter);
                for _ in 0..ITERATIONS {
                    // SAFETY: `counter` outlives the scope and is only
                    // accessed atomically.
                    unsafe { interlocked::fetch_add(ptr, 1) };
                }
            });
        }
    });

    assert_eq!(counter.into_inner(), (THREADS * ITERATIONS) as u32);
}

#[test]
fn narrow_counters_do_not_interfere() {
    let bytes = Atomic::new([0u8; 4]);

    thread::scope(|s| {
        for lane in 0..4 {
            let bytes = &bytes;
            s.spawn(move || {
                // SAFETY: each lane is a distinct, aligned byte of `bytes`.
                let ptr = unsafe { cell_of(bytes).cast::<u8>().add(lane) };
                for _ in 0..200 {
                    // SAFETY: `bytes` outlives the scope and is only accessed
                    // atomically.
                    unsafe { interlocked::add_fetch(ptr, 1) };
                }
            });
        }
    });

    assert_eq!(bytes.into_inner(), [200; 4]);
}

#[test]
fn atomic_increment_and_decrement_balance() {
    let counter = Atomic::new(0i32);

    thread::scope(|s| {
        for i in 0..THREADS {
            let counter = &counter;
            s.spawn(move || {
                for _ in 0..ITERATIONS {
                    if i % 2 == 0 {
                        counter.increment();
                    } else {
                        counter.fetch_decrement();
                    }
                }
            });
        }
    });

    assert_eq!(counter.load(), 0);
}

#[test]
#[cfg(target_has_atomic = "64")]
fn emulated_fetch_add_from_many_threads_is_exact() {
    let counter = Atomic::new(0u64);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let ptr = cell_of(&counter);
                for _ in 0..ITERATIONS {
                    // SAFETY: `counter` outlives the scope and is only
                    // accessed atomically.
                    unsafe { <Emulated<Builtin> as Backend<u64>>::fetch_add(ptr, 1) };
                }
            });
        }
    });

    assert_eq!(counter.into_inner(), (THREADS * ITERATIONS) as u64);
}

#[test]
#[cfg(target_has_atomic = "64")]
fn emulated_exchange_hands_out_every_ticket_once() {
    let slot = Atomic::new(u64::MAX);
    let mut seen = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS as u64)
            .map(|ticket| {
                let slot = &slot;
                s.spawn(move || {
                    // SAFETY: `slot` outlives the scope and is only accessed
                    // atomically.
                    unsafe { <Emulated<Builtin> as Backend<u64>>::exchange(cell_of(slot), ticket) }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });
    seen.push(slot.load());
    seen.sort_unstable();

    let mut expected: Vec<u64> = (0..THREADS as u64).collect();
    expected.push(u64::MAX);
    assert_eq!(seen, expected);
}

#[test]
fn compare_and_swap_fetch_loop_is_exact() {
    let counter = Atomic::new(0u32);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut expected = counter.load();
                for _ in 0..ITERATIONS {
                    loop {
                        let desired = expected.wrapping_mul(3).wrapping_add(1);
                        if counter.compare_and_swap_fetch(&mut expected, desired) {
                            break;
                        }
                        interlocked::pause();
                    }
                }
            });
        }
    });

    // Every successful step applied `x -> 3x + 1` exactly once.
    let mut expected = 0u32;
    for _ in 0..THREADS * ITERATIONS {
        expected = expected.wrapping_mul(3).wrapping_add(1);
    }
    assert_eq!(counter.into_inner(), expected);
}

#[test]
fn random_operands_match_wrapping_arithmetic() {
    let mut rng = StdRng::seed_from_u64(0x1F2E_3D4C);
    let cell = Atomic::new(0u32);
    let mut model = 0u32;

    for _ in 0..1_000 {
        let operand: u32 = rng.random();
        let (previous, next) = match rng.random_range(0..6) {
            0 => (cell.fetch_add(operand), model.wrapping_add(operand)),
            1 => (cell.fetch_sub(operand), model.wrapping_sub(operand)),
            2 => (cell.fetch_and(operand), model & operand),
            3 => (cell.fetch_or(operand), model | operand),
            4 => (cell.fetch_xor(operand), model ^ operand),
            _ => (cell.fetch_nand(operand), !(model & operand)),
        };
        assert_eq!(previous, model);
        model = next;
        assert_eq!(cell.load(), model);
    }
}

#[test]
fn random_op_fetch_equals_fetch_op_applied() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let fetch = Atomic::new(0i16);
    let op_fetch = Atomic::new(0i16);

    for _ in 0..1_000 {
        let operand: i16 = rng.random();
        let (pre, post) = match rng.random_range(0..6) {
            0 => (fetch.fetch_add(operand).wrapping_add(operand), op_fetch.add_fetch(operand)),
            1 => (fetch.fetch_sub(operand).wrapping_sub(operand), op_fetch.sub_fetch(operand)),
            2 => (fetch.fetch_and(operand) & operand, op_fetch.and_fetch(operand)),
            3 => (fetch.fetch_or(operand) | operand, op_fetch.or_fetch(operand)),
            4 => (fetch.fetch_xor(operand) ^ operand, op_fetch.xor_fetch(operand)),
            _ => (!(fetch.fetch_nand(operand) & operand), op_fetch.nand_fetch(operand)),
        };
        assert_eq!(pre, post);
        assert_eq!(fetch.load(), op_fetch.load());
    }
}

#[test]
#[cfg(target_has_atomic = "64")]
fn random_emulated_operations_match_builtin() {
    type Emulated64 = Emulated<Builtin>;

    let mut rng = StdRng::seed_from_u64(64);
    let emulated = Atomic::new(0u64);
    let builtin = Atomic::new(0u64);
    let (e, b) = (cell_of(&emulated), cell_of(&builtin));

    for _ in 0..1_000 {
        let operand: u64 = rng.random();
        // SAFETY: both cells are owned by this test and only accessed
        // atomically.
        unsafe {
            let (lhs, rhs) = match rng.random_range(0..7) {
                0 => (Emulated64::fetch_add(e, operand), Builtin::fetch_add(b, operand)),
                1 => (Emulated64::fetch_sub(e, operand), Builtin::fetch_sub(b, operand)),
                2 => (Emulated64::fetch_and(e, operand), Builtin::fetch_and(b, operand)),
                3 => (Emulated64::fetch_or(e, operand), Builtin::fetch_or(b, operand)),
                4 => (Emulated64::fetch_xor(e, operand), Builtin::fetch_xor(b, operand)),
                5 => (Emulated64::fetch_nand(e, operand), Builtin::fetch_nand(b, operand)),
                _ => (Emulated64::exchange(e, operand), Builtin::exchange(b, operand)),
            };
            assert_eq!(lhs, rhs);
            assert_eq!(Emulated64::load(e), Builtin::load(b));
        }
    }
}
