//! Series storage for the three granularities.
//!
//! The raw series keeps every measurement in time order. The hourly and daily
//! series keep one [`Bucket`] per calendar hour/day, keyed by the UTC bucket
//! start, with the mean maintained incrementally.

use crate::measurement::Measurement;
use chrono::{DateTime, DurationRound, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Time resolution of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One point per measurement.
    Raw,
    /// One point per UTC calendar hour.
    Hourly,
    /// One point per UTC calendar day.
    Daily,
}

impl Granularity {
    /// All granularities, finest first.
    pub const ALL: [Granularity; 3] = [Granularity::Raw, Granularity::Hourly, Granularity::Daily];

    /// Start of the bucket containing `ts`: `start <= ts < start + width`.
    ///
    /// Raw points are their own bucket.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Raw => ts,
            Granularity::Hourly => ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts),
            Granularity::Daily => ts.date_naive().and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Raw => "raw",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point of a series.
///
/// For raw points `timestamp` is the measurement time and `count` is 1.
/// For aggregates `timestamp` is the bucket start, `value` the mean and
/// `count` the number of measurements folded in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Measurement time or bucket start.
    pub timestamp: DateTime<Utc>,
    /// Value or mean.
    pub value: f64,
    /// Number of measurements represented.
    pub count: u64,
}

impl SeriesPoint {
    /// Point for a single raw measurement.
    pub fn raw(measurement: &Measurement) -> Self {
        Self {
            timestamp: measurement.timestamp,
            value: measurement.value,
            count: 1,
        }
    }
}

/// Maximum age of each series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Raw window (24 hours by default).
    pub raw: TimeDelta,
    /// Hourly window (30 days by default).
    pub hourly: TimeDelta,
    /// Daily window (365 days by default).
    pub daily: TimeDelta,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw: TimeDelta::hours(24),
            hourly: TimeDelta::days(30),
            daily: TimeDelta::days(365),
        }
    }
}

impl RetentionPolicy {
    /// Window for `granularity`.
    pub fn window(&self, granularity: Granularity) -> TimeDelta {
        match granularity {
            Granularity::Raw => self.raw,
            Granularity::Hourly => self.hourly,
            Granularity::Daily => self.daily,
        }
    }

    /// Oldest timestamp still retained at `now`. Points at exactly the cutoff are kept.
    pub fn cutoff(&self, granularity: Granularity, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window(granularity)
    }
}

/// Running mean of one hour or day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Bucket {
    start: DateTime<Utc>,
    mean: f64,
    count: u64,
}

impl Bucket {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            mean: 0.0,
            count: 0,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    fn point(&self) -> SeriesPoint {
        SeriesPoint {
            timestamp: self.start,
            value: self.mean,
            count: self.count,
        }
    }
}

/// Raw measurements ordered by timestamp.
#[derive(Debug, Default)]
pub(crate) struct RawSeries {
    points: VecDeque<SeriesPoint>,
}

impl RawSeries {
    pub(crate) fn insert(&mut self, point: SeriesPoint) {
        // Equal timestamps keep arrival order
        let at = self.points.partition_point(|p| p.timestamp <= point.timestamp);
        self.points.insert(at, point);
    }

    pub(crate) fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while self.points.front().is_some_and(|p| p.timestamp < cutoff) {
            self.points.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub(crate) fn points_since(&self, cutoff: DateTime<Utc>) -> Vec<SeriesPoint> {
        let start = self.points.partition_point(|p| p.timestamp < cutoff);
        self.points.range(start..).copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }
}

/// Hourly or daily buckets keyed by bucket start.
#[derive(Debug)]
pub(crate) struct BucketSeries {
    granularity: Granularity,
    buckets: BTreeMap<DateTime<Utc>, Bucket>,
}

impl BucketSeries {
    pub(crate) fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            buckets: BTreeMap::new(),
        }
    }

    /// Fold `value` into the bucket containing `ts`.
    ///
    /// When this opens a bucket later than every existing one, the previous
    /// latest bucket is complete and its point is returned.
    pub(crate) fn add(&mut self, ts: DateTime<Utc>, value: f64) -> Option<SeriesPoint> {
        let start = self.granularity.bucket_start(ts);
        let completed = match self.buckets.last_key_value() {
            Some((&latest, bucket)) if latest < start => Some(bucket.point()),
            _ => None,
        };
        self.buckets
            .entry(start)
            .or_insert_with(|| Bucket::new(start))
            .add(value);
        completed
    }

    /// Replace or insert a persisted bucket.
    pub(crate) fn restore(&mut self, point: SeriesPoint) {
        let start = self.granularity.bucket_start(point.timestamp);
        self.buckets.insert(
            start,
            Bucket {
                start,
                mean: point.value,
                count: point.count.max(1),
            },
        );
    }

    pub(crate) fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let kept = self.buckets.split_off(&cutoff);
        let evicted = self.buckets.len();
        self.buckets = kept;
        evicted
    }

    pub(crate) fn points_since(&self, cutoff: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.buckets.range(cutoff..).map(|(_, b)| b.point()).collect()
    }

    /// The latest bucket, which may still receive measurements.
    pub(crate) fn open_bucket(&self) -> Option<SeriesPoint> {
        self.buckets.last_key_value().map(|(_, b)| b.point())
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, s).unwrap()
    }

    #[test]
    fn hourly_bucket_truncates_to_hour_start() {
        assert_eq!(Granularity::Hourly.bucket_start(at(13, 59, 59)), at(13, 0, 0));
        assert_eq!(Granularity::Hourly.bucket_start(at(14, 0, 0)), at(14, 0, 0));
    }

    #[test]
    fn daily_bucket_truncates_to_utc_midnight() {
        assert_eq!(Granularity::Daily.bucket_start(at(23, 59, 59)), at(0, 0, 0));
    }

    #[test]
    fn incremental_mean_matches_arithmetic_mean() {
        let mut bucket = Bucket::new(at(0, 0, 0));
        for v in [20.0, 21.0, 22.5, 19.5] {
            bucket.add(v);
        }
        assert!((bucket.mean - 20.75).abs() < 1e-12);
        assert_eq!(bucket.count, 4);
    }

    #[test]
    fn raw_insert_keeps_time_order() {
        let mut raw = RawSeries::default();
        for (ts, v) in [(at(1, 0, 2), 2.0), (at(1, 0, 0), 0.0), (at(1, 0, 1), 1.0)] {
            raw.insert(SeriesPoint {
                timestamp: ts,
                value: v,
                count: 1,
            });
        }
        let values: Vec<f64> = raw.points_since(at(0, 0, 0)).iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn bucket_series_reports_completed_bucket_once() {
        let mut series = BucketSeries::new(Granularity::Hourly);
        assert!(series.add(at(10, 5, 0), 20.0).is_none());
        assert!(series.add(at(10, 55, 0), 22.0).is_none());

        let completed = series.add(at(11, 0, 0), 30.0).unwrap();
        assert_eq!(completed.timestamp, at(10, 0, 0));
        assert_eq!(completed.value, 21.0);
        assert_eq!(completed.count, 2);

        // Late arrival for the finished hour updates it without re-reporting
        assert!(series.add(at(10, 30, 0), 24.0).is_none());
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn bucket_eviction_uses_bucket_start() {
        let mut series = BucketSeries::new(Granularity::Hourly);
        series.add(at(8, 10, 0), 1.0);
        series.add(at(9, 10, 0), 1.0);
        series.add(at(10, 10, 0), 1.0);

        assert_eq!(series.evict_before(at(9, 0, 0)), 1);
        assert_eq!(series.len(), 2);
        assert_eq!(series.open_bucket().unwrap().timestamp, at(10, 0, 0));
    }

    #[test]
    fn cutoff_is_now_minus_window() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.cutoff(Granularity::Raw, at(12, 0, 0)), at(12, 0, 0) - TimeDelta::hours(24));
    }
}
