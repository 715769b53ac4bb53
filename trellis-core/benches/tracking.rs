//! Tracking Benchmarks
//!
//! Measures the cost of the hot paths: recording reads, fanning a write out
//! to many subscribers, and draining the scheduler.

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::{track_get, track_set, Callback, Computed, Effect, Scheduler, Tracker};

fn bench_track_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_get");
    for keys in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, &keys| {
            let source = Rc::new(RefCell::new(0u64));
            let callback = Callback::new(|| {});
            b.iter(|| {
                let context = Tracker::begin_track(&callback);
                for key in 0..keys {
                    track_get(&source, key);
                }
                black_box(context.end()).ok();
            });
            trellis_core::reset();
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for subscribers in [1usize, 64, 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let source = Rc::new(RefCell::new(0u64));
                let effects: Vec<Effect> = (0..subscribers)
                    .map(|_| {
                        let source = source.clone();
                        Effect::new(move || {
                            track_get(&source, "value");
                            black_box(*source.borrow());
                        })
                    })
                    .collect();

                b.iter(|| {
                    *source.borrow_mut() += 1;
                    track_set(&source, "value");
                    black_box(Scheduler::flush());
                });

                drop(effects);
                trellis_core::reset();
            },
        );
    }
    group.finish();
}

fn bench_computed_chain(c: &mut Criterion) {
    c.bench_function("computed_chain_10", |b| {
        let source = Rc::new(RefCell::new(1u64));
        let reader = source.clone();
        let mut tail = Computed::new(move || {
            track_get(&reader, "value");
            *reader.borrow()
        });
        for _ in 0..9 {
            let previous = tail.clone();
            tail = Computed::new(move || previous.get().unwrap_or_default() + 1);
        }

        b.iter(|| {
            *source.borrow_mut() += 1;
            track_set(&source, "value");
            Scheduler::flush();
            black_box(tail.get());
        });

        trellis_core::reset();
    });
}

criterion_group!(benches, bench_track_get, bench_fan_out, bench_computed_chain);
criterion_main!(benches);
