//! Frame handling: parse, record, persist.
//!
//! [`IngestPipeline::handle_frame`] is what the frame reader calls for every
//! frame. Nothing that goes wrong with a single frame escapes it: malformed
//! frames and log write failures are reported through `tracing` and counted
//! in [`IngestStats`], and the reader keeps going.

use crate::aggregation::{Granularity, RecordOutcome, SeriesPoint, SharedEngine};
use crate::clock::SharedClock;
use crate::error::{MalformedMeasurement, PersistenceError};
use crate::measurement::{FrameParser, Measurement};
use crate::reader::Frame;
use crate::storage::RetentionLogger;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of handling one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Frame carried no temperature marker.
    Ignored,
    /// A measurement was recorded.
    Recorded(Measurement),
    /// The marker was present but its field was unusable.
    Malformed(MalformedMeasurement),
}

/// Counters updated by the pipeline, readable from any thread.
#[derive(Debug, Default)]
pub struct IngestStats {
    frames: AtomicU64,
    ignored: AtomicU64,
    recorded: AtomicU64,
    malformed: AtomicU64,
    persistence_failures: AtomicU64,
}

/// Copy of [`IngestStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    /// Frames handed to the pipeline.
    pub frames: u64,
    /// Frames without the temperature marker.
    pub ignored: u64,
    /// Measurements recorded.
    pub recorded: u64,
    /// Frames rejected as malformed.
    pub malformed: u64,
    /// Log writes that failed.
    pub persistence_failures: u64,
}

impl IngestStats {
    /// Read all counters.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Turns frames into recorded, persisted measurements.
#[derive(Clone)]
pub struct IngestPipeline {
    parser: FrameParser,
    engine: SharedEngine,
    logger: Arc<Mutex<RetentionLogger>>,
    clock: SharedClock,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    /// Pipeline recording into `engine` and persisting through `logger`.
    pub fn new(
        parser: FrameParser,
        engine: SharedEngine,
        logger: Arc<Mutex<RetentionLogger>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            parser,
            engine,
            logger,
            clock,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Handle one frame.
    pub fn handle_frame(&self, frame: &Frame) -> FrameOutcome {
        IngestStats::bump(&self.stats.frames);

        let measurement = match self.parser.measure(frame.as_str(), self.clock.now()) {
            Ok(Some(m)) => m,
            Ok(None) => {
                debug!(frame = %frame, "Ignoring frame without temperature marker");
                IngestStats::bump(&self.stats.ignored);
                return FrameOutcome::Ignored;
            }
            Err(e) => {
                warn!(frame = %frame, field = %e.field, "{}", e);
                IngestStats::bump(&self.stats.malformed);
                return FrameOutcome::Malformed(e);
            }
        };

        let outcome = self.engine.record(measurement);
        IngestStats::bump(&self.stats.recorded);
        info!(value = measurement.value, "Temperature: {}", measurement.value);

        self.persist(&measurement, &outcome);
        FrameOutcome::Recorded(measurement)
    }

    fn persist(&self, measurement: &Measurement, outcome: &RecordOutcome) {
        let mut logger = self.logger.lock();

        let result = logger.log_measurement(measurement.timestamp, measurement.value);
        self.report(Granularity::Raw, result);

        if let Some(hour) = &outcome.completed_hour {
            log_completed(Granularity::Hourly, hour);
            let result = logger.log_hourly_average(hour);
            self.report(Granularity::Hourly, result);
        }
        if let Some(day) = &outcome.completed_day {
            log_completed(Granularity::Daily, day);
            let result = logger.log_daily_average(day);
            self.report(Granularity::Daily, result);
        }
    }

    /// Persist the still-open hourly and daily buckets.
    pub fn flush_open_buckets(&self) {
        let open = self.engine.open_buckets();
        if open.is_empty() {
            return;
        }
        let mut logger = self.logger.lock();
        for (granularity, point) in open {
            debug!(%granularity, bucket = %point.timestamp, count = point.count, "Flushing open bucket");
            let result = logger.log(granularity, &point);
            self.report(granularity, result);
        }
    }

    fn report(&self, granularity: Granularity, result: Result<(), PersistenceError>) {
        if let Err(e) = result {
            IngestStats::bump(&self.stats.persistence_failures);
            warn!(%granularity, "Failed to persist: {}", e);
        }
    }
}

fn log_completed(granularity: Granularity, point: &SeriesPoint) {
    info!(
        %granularity,
        bucket = %point.timestamp,
        count = point.count,
        "Average: {:.2}",
        point.value
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationEngine, RetentionPolicy};
    use crate::clock::ManualClock;
    use crate::config::StorageConfig;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::path::Path;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn pipeline_in(dir: &Path, clock: &ManualClock) -> IngestPipeline {
        let clock: SharedClock = Arc::new(clock.clone());
        let config = StorageConfig {
            output_dir: dir.to_path_buf(),
            ..StorageConfig::default()
        };
        let logger = RetentionLogger::open(&config, RetentionPolicy::default(), Arc::clone(&clock)).unwrap();
        let engine = SharedEngine::new(AggregationEngine::new(Arc::clone(&clock), RetentionPolicy::default()));
        IngestPipeline::new(FrameParser::default(), engine, Arc::new(Mutex::new(logger)), clock)
    }

    #[test]
    #[traced_test]
    fn records_measurement_at_ingestion_time() {
        let dir = tempdir().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 8, 15, 0).unwrap();
        let clock = ManualClock::new(t);
        let pipeline = pipeline_in(dir.path(), &clock);

        let outcome = pipeline.handle_frame(&Frame::new("TEMP:23.5 HUM:40"));
        assert_eq!(outcome, FrameOutcome::Recorded(Measurement::new(t, 23.5)));

        let raw: Vec<_> = pipeline.engine.snapshot(Granularity::Raw).collect();
        assert_eq!(raw.len(), 1);
        assert_eq!((raw[0].timestamp, raw[0].value), (t, 23.5));
        assert!(logs_contain("Temperature: 23.5"));
    }

    #[test]
    #[traced_test]
    fn malformed_frame_is_reported_not_recorded() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let pipeline = pipeline_in(dir.path(), &clock);

        let outcome = pipeline.handle_frame(&Frame::new("TEMP:abc"));
        assert!(matches!(outcome, FrameOutcome::Malformed(ref e) if e.field == "abc"));
        assert_eq!(pipeline.engine.len(Granularity::Raw), 0);
        assert!(logs_contain("Malformed measurement"));

        let stats = pipeline.stats().snapshot();
        assert_eq!((stats.frames, stats.malformed, stats.recorded), (1, 1, 0));
    }

    #[test]
    fn frames_without_marker_are_ignored() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let pipeline = pipeline_in(dir.path(), &clock);

        assert_eq!(pipeline.handle_frame(&Frame::new("HUM:40")), FrameOutcome::Ignored);
        assert_eq!(pipeline.handle_frame(&Frame::new("")), FrameOutcome::Ignored);
        assert_eq!(pipeline.stats().snapshot().ignored, 2);
    }

    #[test]
    fn completed_hour_is_persisted() {
        let dir = tempdir().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let clock = ManualClock::new(t);
        let pipeline = pipeline_in(dir.path(), &clock);

        pipeline.handle_frame(&Frame::new("TEMP:20"));
        pipeline.handle_frame(&Frame::new("TEMP:22"));
        clock.advance(TimeDelta::hours(1));
        pipeline.handle_frame(&Frame::new("TEMP:30"));

        let hourly = pipeline.logger.lock().load(Granularity::Hourly).unwrap();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].timestamp, Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap());
        assert_eq!((hourly[0].value, hourly[0].count), (21.0, 2));
        assert!(pipeline.logger.lock().load(Granularity::Daily).unwrap().is_empty());
    }

    #[test]
    fn flush_writes_open_buckets() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap());
        let pipeline = pipeline_in(dir.path(), &clock);
        pipeline.handle_frame(&Frame::new("TEMP:19.5"));

        pipeline.flush_open_buckets();

        let mut logger = pipeline.logger.lock();
        assert_eq!(logger.load(Granularity::Hourly).unwrap().len(), 1);
        assert_eq!(logger.load(Granularity::Daily).unwrap()[0].value, 19.5);
    }

    #[test]
    #[traced_test]
    fn persistence_failure_does_not_stop_ingestion() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let pipeline = pipeline_in(dir.path(), &clock);

        // Replace the raw log with a directory so appends fail
        let raw_path = pipeline.logger.lock().path(Granularity::Raw).to_path_buf();
        std::fs::remove_file(&raw_path).unwrap();
        std::fs::create_dir(&raw_path).unwrap();

        let outcome = pipeline.handle_frame(&Frame::new("TEMP:21"));
        assert!(matches!(outcome, FrameOutcome::Recorded(_)));
        assert_eq!(pipeline.engine.len(Granularity::Raw), 1);
        assert_eq!(pipeline.stats().snapshot().persistence_failures, 1);
        assert!(logs_contain("Failed to persist"));
    }
}
