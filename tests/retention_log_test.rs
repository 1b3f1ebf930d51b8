//! Retention logs against the in-memory engine.

use chrono::{TimeDelta, TimeZone, Utc};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use thermolog::aggregation::{AggregationEngine, Granularity, RetentionPolicy, SeriesPoint};
use thermolog::clock::{ManualClock, SharedClock};
use thermolog::config::StorageConfig;
use thermolog::measurement::Measurement;
use thermolog::storage::RetentionLogger;

#[test]
fn persisted_series_match_engine_after_trimming() {
    let dir = tempdir().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    let shared: SharedClock = Arc::new(clock.clone());
    let policy = RetentionPolicy::default();

    let config = StorageConfig {
        output_dir: dir.path().to_path_buf(),
        ..StorageConfig::default()
    };
    let mut logger = RetentionLogger::open(&config, policy, Arc::clone(&shared)).unwrap();
    let mut engine = AggregationEngine::new(shared, policy);

    // Two days at one reading every 20 minutes
    for k in 0..(2 * 24 * 3) {
        clock.set(start + TimeDelta::minutes(20 * k));
        let m = Measurement::new(clock.now(), 15.0 + (k % 7) as f64);
        let outcome = engine.record(m);
        logger.log_measurement(m.timestamp, m.value).unwrap();
        if let Some(hour) = outcome.completed_hour {
            logger.log_hourly_average(&hour).unwrap();
        }
        if let Some(day) = outcome.completed_day {
            logger.log_daily_average(&day).unwrap();
        }
    }
    for (granularity, point) in engine.open_buckets() {
        match granularity {
            Granularity::Hourly => logger.log_hourly_average(&point).unwrap(),
            _ => logger.log_daily_average(&point).unwrap(),
        }
    }

    for granularity in Granularity::ALL {
        let persisted = logger.load(granularity).unwrap();
        let held: Vec<SeriesPoint> = engine.snapshot(granularity).collect();
        assert_eq!(persisted.len(), held.len(), "{granularity}");
        for (p, h) in persisted.iter().zip(&held) {
            assert_eq!(p.timestamp, h.timestamp, "{granularity}");
            assert!((p.value - h.value).abs() < 1e-9, "{granularity}");
        }
    }
}

#[test]
fn aggregate_logs_are_trimmed_to_their_windows() {
    let dir = tempdir().unwrap();
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    let config = StorageConfig {
        output_dir: dir.path().to_path_buf(),
        ..StorageConfig::default()
    };
    let mut logger =
        RetentionLogger::open(&config, RetentionPolicy::default(), Arc::new(clock.clone())).unwrap();

    let point = |days: i64| SeriesPoint {
        timestamp: start + TimeDelta::days(days),
        value: days as f64,
        count: 24,
    };

    for day in 0..400 {
        clock.set(start + TimeDelta::days(day));
        logger.log_daily_average(&point(day)).unwrap();
        logger.log_hourly_average(&point(day)).unwrap();
    }

    let daily = fs::read_to_string(config.daily_path()).unwrap();
    assert_eq!(daily.lines().count(), 366);
    assert!(daily.starts_with("2023-02-04T00:00:00Z,34.0,24"));

    let hourly = fs::read_to_string(config.hourly_path()).unwrap();
    assert_eq!(hourly.lines().count(), 31);
}

#[test]
fn custom_file_names_are_honoured() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        output_dir: dir.path().join("out"),
        raw_file: "raw.csv".to_string(),
        hourly_file: "hours.csv".to_string(),
        daily_file: "days.csv".to_string(),
    };
    let clock = ManualClock::new(Utc::now());
    let mut logger =
        RetentionLogger::open(&config, RetentionPolicy::default(), Arc::new(clock.clone())).unwrap();
    logger.log_measurement(clock.now(), 20.0).unwrap();

    assert!(dir.path().join("out/raw.csv").exists());
    assert_eq!(logger.path(Granularity::Daily), dir.path().join("out/days.csv"));
}
