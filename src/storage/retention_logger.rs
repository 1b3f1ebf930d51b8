//! Durable raw, hourly and daily logs with the engine's retention windows.

use super::log_file::LogFile;
use crate::aggregation::{Granularity, RetentionPolicy, SeriesPoint};
use crate::clock::SharedClock;
use crate::config::StorageConfig;
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Persists the three series, trimming each log to its retention window on
/// every append.
pub struct RetentionLogger {
    raw: LogFile,
    hourly: LogFile,
    daily: LogFile,
    policy: RetentionPolicy,
    clock: SharedClock,
}

impl RetentionLogger {
    /// Open (creating if needed) the logs described by `config`.
    pub fn open(
        config: &StorageConfig,
        policy: RetentionPolicy,
        clock: SharedClock,
    ) -> Result<Self, PersistenceError> {
        fs::create_dir_all(&config.output_dir)
            .map_err(|e| PersistenceError::io(&config.output_dir, e))?;

        Ok(Self {
            raw: LogFile::open(config.raw_path(), Granularity::Raw)?,
            hourly: LogFile::open(config.hourly_path(), Granularity::Hourly)?,
            daily: LogFile::open(config.daily_path(), Granularity::Daily)?,
            policy,
            clock,
        })
    }

    /// Append a measurement to the raw log.
    pub fn log_measurement(&mut self, timestamp: DateTime<Utc>, value: f64) -> Result<(), PersistenceError> {
        self.log(
            Granularity::Raw,
            &SeriesPoint {
                timestamp,
                value,
                count: 1,
            },
        )
    }

    /// Append a completed (or flushed) hour to the hourly log.
    pub fn log_hourly_average(&mut self, point: &SeriesPoint) -> Result<(), PersistenceError> {
        self.log(Granularity::Hourly, point)
    }

    /// Append a completed (or flushed) day to the daily log.
    pub fn log_daily_average(&mut self, point: &SeriesPoint) -> Result<(), PersistenceError> {
        self.log(Granularity::Daily, point)
    }

    /// Append `point` to the log of `granularity`, then enforce its retention.
    pub fn log(&mut self, granularity: Granularity, point: &SeriesPoint) -> Result<(), PersistenceError> {
        let cutoff = self.policy.cutoff(granularity, self.clock.now());
        let log = self.file_mut(granularity);
        log.append(point)?;
        log.trim(cutoff)?;
        Ok(())
    }

    /// Retained records of one log, oldest first. Expired records are trimmed
    /// from disk first.
    pub fn load(&mut self, granularity: Granularity) -> Result<Vec<SeriesPoint>, PersistenceError> {
        let cutoff = self.policy.cutoff(granularity, self.clock.now());
        let log = self.file_mut(granularity);
        log.trim(cutoff)?;
        let points = log.read()?;
        debug!(%granularity, points = points.len(), "Loaded retention log");
        Ok(points)
    }

    /// Trim all three logs, returning the number of records dropped.
    pub fn trim_all(&mut self) -> Result<usize, PersistenceError> {
        let now = self.clock.now();
        let mut dropped = 0;
        for granularity in Granularity::ALL {
            let cutoff = self.policy.cutoff(granularity, now);
            dropped += self.file_mut(granularity).trim(cutoff)?;
        }
        Ok(dropped)
    }

    /// Location of the log for `granularity`.
    pub fn path(&self, granularity: Granularity) -> &Path {
        self.file(granularity).path()
    }

    fn file(&self, granularity: Granularity) -> &LogFile {
        match granularity {
            Granularity::Raw => &self.raw,
            Granularity::Hourly => &self.hourly,
            Granularity::Daily => &self.daily,
        }
    }

    fn file_mut(&mut self, granularity: Granularity) -> &mut LogFile {
        match granularity {
            Granularity::Raw => &mut self.raw,
            Granularity::Hourly => &mut self.hourly,
            Granularity::Daily => &mut self.daily,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn logger_in(dir: &Path, clock: &ManualClock) -> RetentionLogger {
        let config = StorageConfig {
            output_dir: dir.to_path_buf(),
            ..StorageConfig::default()
        };
        RetentionLogger::open(&config, RetentionPolicy::default(), Arc::new(clock.clone())).unwrap()
    }

    #[test]
    fn open_creates_output_dir_and_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("logs").join("thermo");
        let clock = ManualClock::new(Utc::now());
        let logger = logger_in(&nested, &clock);

        for g in Granularity::ALL {
            assert!(logger.path(g).exists(), "{g} log missing");
        }
        assert!(logger.path(Granularity::Raw).ends_with("temperature_measurements.log"));
    }

    #[test]
    fn raw_log_keeps_last_day_only() {
        let dir = tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let mut logger = logger_in(dir.path(), &clock);

        logger.log_measurement(clock.now(), 20.0).unwrap();
        clock.advance(TimeDelta::hours(12));
        logger.log_measurement(clock.now(), 21.0).unwrap();
        clock.advance(TimeDelta::hours(13));
        logger.log_measurement(clock.now(), 22.0).unwrap();

        let contents = fs::read_to_string(logger.path(Granularity::Raw)).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(!contents.contains("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn load_trims_before_returning() {
        let dir = tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let mut logger = logger_in(dir.path(), &clock);

        let hour = SeriesPoint {
            timestamp: start,
            value: 19.0,
            count: 60,
        };
        logger.log_hourly_average(&hour).unwrap();
        logger.log_daily_average(&hour).unwrap();

        clock.advance(TimeDelta::days(31));
        assert!(logger.load(Granularity::Hourly).unwrap().is_empty());
        assert_eq!(logger.load(Granularity::Daily).unwrap(), vec![hour]);
    }

    #[test]
    fn trim_all_reports_dropped_records() {
        let dir = tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let mut logger = logger_in(dir.path(), &clock);
        logger.log_measurement(start, 1.0).unwrap();
        logger.log_measurement(start, 2.0).unwrap();

        clock.advance(TimeDelta::days(2));
        assert_eq!(logger.trim_all().unwrap(), 2);
        assert_eq!(logger.trim_all().unwrap(), 0);
    }
}
