// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::hint::black_box;
use std::ptr::NonNull;
use std::thread;

use criterion::{Criterion, criterion_group, criterion_main};
use interlocked::{Atomic, Backend, Builtin, Emulated, Integer};

macro_rules! bench_widths {
    ($($ty: ty,)*) => {
        fn bench_facade(c: &mut Criterion) {
            $(
                {
                    let mut group = c.benchmark_group(stringify!($ty));
                    let cell = Atomic::<$ty>::default();
                    let operand: $ty = 1;

                    group.bench_function("load", |b| b.iter(|| black_box(&cell).load()));
                    group.bench_function("store", |b| b.iter(|| cell.store(black_box(operand))));
                    group.bench_function("exchange", |b| b.iter(|| cell.exchange(black_box(operand))));
                    group.bench_function("fetch_add", |b| b.iter(|| cell.fetch_add(black_box(operand))));
                    group.bench_function("and_fetch", |b| b.iter(|| cell.and_fetch(black_box(operand))));
                    group.bench_function("fetch_nand", |b| b.iter(|| cell.fetch_nand(black_box(operand))));
                    group.bench_function("compare_and_swap", |b| {
                        b.iter(|| cell.compare_and_swap(black_box(operand), black_box(operand)))
                    });
                    group.finish();
                }
            )*
        }
    };
}

bench_widths!(u8, u16, u32, u64,);

fn bench_emulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("u64 backends");
    let cell = Atomic::new(0u64);
    let ptr = NonNull::new(cell.as_ptr()).unwrap();

    // SAFETY: `cell` outlives every iteration and is only accessed atomically.
    group.bench_function("builtin fetch_add", |b| {
        b.iter(|| unsafe { Builtin::fetch_add(ptr, black_box(1)) })
    });
    // SAFETY: as above.
    group.bench_function("emulated fetch_add", |b| {
        b.iter(|| unsafe { <Emulated<Builtin> as Backend<u64>>::fetch_add(ptr, black_box(1)) })
    });
    // SAFETY: as above.
    group.bench_function("emulated load", |b| {
        b.iter(|| unsafe { <Emulated<Builtin> as Backend<u64>>::load(ptr) })
    });
    group.finish();
}

fn contended<T: Integer + Send + Sync>(threads: usize, one: T) {
    let cell = Atomic::<T>::default();
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..1_000 {
                    cell.fetch_add(one);
                }
            });
        }
    });
    black_box(cell.into_inner());
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended fetch_add");
    for threads in [1, 2, 4] {
        group.bench_function(format!("u32 x{threads}"), |b| b.iter(|| contended(threads, 1u32)));
    }
    group.finish();
}

criterion_group!(benches, bench_facade, bench_emulation, bench_contention);
criterion_main!(benches);
