//! Aggregation store throughput
//!
//! `record()` runs once per tracked thread on every tick and `snapshot()`
//! runs on every report write; both must stay far below the sampling
//! interval.
//!
//! ```bash
//! cargo bench --bench store_record
//! ```

use chrono::Local;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use wattrace::activity::{Activity, MethodIdentifier};
use wattrace::data_point::DataPoint;
use wattrace::store::EnergyStore;
use wattrace::tracker::{ActivitySource, MethodTracker, PackageFilter};

fn bench_activity(i: usize, methods: usize) -> Activity {
    let now = Local::now();
    let name = format!("app.Service{}.handle", i % methods);
    Activity {
        thread: Arc::from("bench"),
        raw: MethodIdentifier::present(name.as_str()),
        filtered: MethodIdentifier::present(name.as_str()),
        energy: DataPoint::joules("Energy", 0.25, now),
        timestamp: now,
    }
}

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_record");
    for methods in [1usize, 100, 10_000] {
        let activities: Vec<Activity> = (0..1024).map(|i| bench_activity(i, methods)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(methods), &activities, |b, acts| {
            let store = EnergyStore::new(1);
            let mut i = 0;
            b.iter(|| {
                store.record(black_box(&acts[i % acts.len()]));
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_snapshot");
    for methods in [10usize, 1_000] {
        let store = EnergyStore::new(1);
        for i in 0..methods {
            store.record(&bench_activity(i, methods));
        }
        group.bench_with_input(BenchmarkId::from_parameter(methods), &store, |b, store| {
            b.iter(|| black_box(store.snapshot(false)));
        });
    }
    group.finish();
}

fn bench_tracker(c: &mut Criterion) {
    let tracker = MethodTracker::new(PackageFilter::new(["app"]));
    let outer = tracker.register("app.Main.run");
    let inner = tracker.register("lib.Json.parse");
    let thread = tracker.attach("bench");

    c.bench_function("tracker_enter_exit", |b| {
        b.iter(|| {
            let _outer = thread.enter(black_box(outer));
            let _inner = thread.enter(black_box(inner));
        });
    });

    c.bench_function("tracker_snapshot", |b| {
        let _active = thread.enter(outer);
        b.iter(|| black_box(tracker.snapshot()));
    });
}

criterion_group!(benches, bench_record, bench_snapshot, bench_tracker);
criterion_main!(benches);
