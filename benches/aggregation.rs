//! Criterion benchmarks for the aggregation hot path.
//!
//! `record` runs once per frame on the reader thread, holding the engine's
//! write lock, so its cost bounds how long snapshots can be blocked.
//!
//! Run with: cargo bench --bench aggregation

use chrono::{TimeDelta, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use thermolog::aggregation::{AggregationEngine, Granularity, RetentionPolicy};
use thermolog::clock::ManualClock;
use thermolog::measurement::Measurement;

/// Record one measurement per second into an engine already holding a full
/// day of raw points, so every call also evicts.
fn record_steady_state(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    let mut engine = AggregationEngine::new(Arc::new(clock.clone()), RetentionPolicy::default());

    for i in 0..86_400 {
        clock.advance(TimeDelta::seconds(1));
        engine.record(Measurement::new(clock.now(), 20.0 + (i % 50) as f64 * 0.1));
    }

    let mut group = c.benchmark_group("aggregation_record");
    group.throughput(Throughput::Elements(1));
    group.bench_function("steady_state_1hz", |b| {
        b.iter(|| {
            clock.advance(TimeDelta::seconds(1));
            black_box(engine.record(Measurement::new(clock.now(), black_box(21.5))));
        });
    });
    group.finish();
}

/// Snapshot cost per granularity with a full retention window.
fn snapshot_full_window(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    let mut engine = AggregationEngine::new(Arc::new(clock.clone()), RetentionPolicy::default());

    // 40 days at one reading per minute fills the hourly window
    for _ in 0..(40 * 24 * 60) {
        clock.advance(TimeDelta::minutes(1));
        engine.record(Measurement::new(clock.now(), 20.0));
    }

    let mut group = c.benchmark_group("aggregation_snapshot");
    for granularity in Granularity::ALL {
        group.bench_with_input(
            BenchmarkId::new("snapshot", granularity),
            &granularity,
            |b, &g| {
                b.iter(|| black_box(engine.snapshot(g).count()));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, record_steady_state, snapshot_full_window);
criterion_main!(benches);
