//! Propagation Benchmarks
//!
//! Measures the write path: marking, eager recomputation of observed
//! deriveds, effect queueing and the flush that follows.

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::{Derived, Runtime};

/// A chain of `depth` deriveds over one signal, observed by one effect.
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let rt = Runtime::new();
            let (source, set_source) = rt.signal(0u64);

            let first = rt.derived(move || source.get() + 1);
            let last = (1..depth).fold(first, |prev: Derived<u64>, _| {
                rt.derived(move || prev.get() + 1)
            });
            let sink = Rc::new(Cell::new(0));
            let out = sink.clone();
            rt.effect(move || out.set(last.get()));

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                set_source.set(black_box(next)).unwrap();
                rt.flush();
                black_box(sink.get())
            });
        });
    }
    group.finish();
}

/// One signal read by `width` effects.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let rt = Runtime::new();
            let (source, set_source) = rt.signal(0u64);
            for _ in 0..width {
                let source = source.clone();
                rt.effect(move || {
                    black_box(source.get());
                });
            }

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                set_source.set(next).unwrap();
                rt.flush().ran
            });
        });
    }
    group.finish();
}

/// Diamonds stacked `layers` deep; every derived must run once per write.
fn bench_diamond(c: &mut Criterion) {
    c.bench_function("diamond_20", |b| {
        let rt = Runtime::new();
        let (source, set_source) = rt.signal(1i64);
        let mut top = rt.derived(move || source.get());
        for _ in 0..20 {
            let (l, r) = (top.clone(), top.clone());
            let left = rt.derived(move || l.get() + 1);
            let right = rt.derived(move || r.get() - 1);
            top = rt.derived(move || left.get() + right.get());
        }
        rt.effect(move || {
            black_box(top.get());
        });

        let mut next = 1i64;
        b.iter(|| {
            next += 1;
            set_source.set(next).unwrap();
            rt.flush()
        });
    });
}

/// A fork that writes and reads a derived, then is discarded.
fn bench_fork(c: &mut Criterion) {
    c.bench_function("fork_discard", |b| {
        let rt = Runtime::new();
        let (source, set_source) = rt.signal(0u64);
        let double = rt.derived(move || source.get() * 2);
        let d = double.clone();
        rt.effect(move || {
            black_box(d.get());
        });

        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            let fork = rt
                .fork(|| {
                    set_source.set(next)?;
                    black_box(double.get());
                    Ok::<_, ripple_core::ReactiveError>(())
                })
                .unwrap();
            black_box(fork.len())
        });
    });
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_diamond, bench_fork);
criterion_main!(benches);
