//! The aggregation engine and its shared handle.

use super::series::{BucketSeries, Granularity, RawSeries, RetentionPolicy, SeriesPoint};
use crate::clock::{SharedClock, SystemClock};
use crate::measurement::Measurement;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// What a single [`AggregationEngine::record`] call changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordOutcome {
    /// Hour that ended because this measurement opened a later hour.
    pub completed_hour: Option<SeriesPoint>,
    /// Day that ended because this measurement opened a later day.
    pub completed_day: Option<SeriesPoint>,
    /// Points dropped from all three series by retention.
    pub evicted: usize,
}

/// Point-in-time copy of one series.
///
/// Iterates once, oldest point first.
#[derive(Debug)]
pub struct Snapshot {
    granularity: Granularity,
    taken_at: DateTime<Utc>,
    points: std::vec::IntoIter<SeriesPoint>,
}

impl Snapshot {
    /// Series this snapshot was taken from.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Clock reading when the snapshot was taken.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

impl Iterator for Snapshot {
    type Item = SeriesPoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.points.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.points.size_hint()
    }
}

impl ExactSizeIterator for Snapshot {}

/// Maintains the raw, hourly and daily series.
///
/// Eviction runs on every `record` against the clock; `snapshot` applies the
/// same cutoff so that a quiet period never exposes expired points.
pub struct AggregationEngine {
    clock: SharedClock,
    policy: RetentionPolicy,
    raw: RawSeries,
    hourly: BucketSeries,
    daily: BucketSeries,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), RetentionPolicy::default())
    }
}

impl AggregationEngine {
    /// Create an empty engine.
    pub fn new(clock: SharedClock, policy: RetentionPolicy) -> Self {
        Self {
            clock,
            policy,
            raw: RawSeries::default(),
            hourly: BucketSeries::new(Granularity::Hourly),
            daily: BucketSeries::new(Granularity::Daily),
        }
    }

    /// Retention policy in force.
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Fold one measurement into all three series and evict expired points.
    pub fn record(&mut self, measurement: Measurement) -> RecordOutcome {
        let Measurement { timestamp, value } = measurement;

        self.raw.insert(SeriesPoint::raw(&measurement));
        let completed_hour = self.hourly.add(timestamp, value);
        let completed_day = self.daily.add(timestamp, value);

        let evicted = self.evict(self.clock.now());
        if evicted > 0 {
            trace!(evicted, "Evicted expired points");
        }

        RecordOutcome {
            completed_hour,
            completed_day,
            evicted,
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let policy = self.policy;
        self.raw.evict_before(policy.cutoff(Granularity::Raw, now))
            + self.hourly.evict_before(policy.cutoff(Granularity::Hourly, now))
            + self.daily.evict_before(policy.cutoff(Granularity::Daily, now))
    }

    /// Time-ordered copy of `granularity` as of now.
    pub fn snapshot(&self, granularity: Granularity) -> Snapshot {
        let now = self.clock.now();
        let cutoff = self.policy.cutoff(granularity, now);
        let points = match granularity {
            Granularity::Raw => self.raw.points_since(cutoff),
            Granularity::Hourly => self.hourly.points_since(cutoff),
            Granularity::Daily => self.daily.points_since(cutoff),
        };
        Snapshot {
            granularity,
            taken_at: now,
            points: points.into_iter(),
        }
    }

    /// Current (possibly incomplete) hourly and daily buckets.
    pub fn open_buckets(&self) -> Vec<(Granularity, SeriesPoint)> {
        let mut open = Vec::with_capacity(2);
        if let Some(p) = self.hourly.open_bucket() {
            open.push((Granularity::Hourly, p));
        }
        if let Some(p) = self.daily.open_bucket() {
            open.push((Granularity::Daily, p));
        }
        open
    }

    /// Seed a series from persisted points, then apply retention.
    ///
    /// Raw points are inserted as measurements; aggregate points replace the
    /// bucket with the same start so that later measurements keep averaging
    /// from the persisted count.
    pub fn restore(&mut self, granularity: Granularity, points: impl IntoIterator<Item = SeriesPoint>) {
        match granularity {
            Granularity::Raw => points.into_iter().for_each(|p| {
                self.raw.insert(SeriesPoint { count: 1, ..p });
            }),
            Granularity::Hourly => points.into_iter().for_each(|p| self.hourly.restore(p)),
            Granularity::Daily => points.into_iter().for_each(|p| self.daily.restore(p)),
        }
        self.evict(self.clock.now());
    }

    /// Number of points currently held for `granularity`.
    pub fn len(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Raw => self.raw.len(),
            Granularity::Hourly => self.hourly.len(),
            Granularity::Daily => self.daily.len(),
        }
    }

    /// Whether no measurement is held.
    pub fn is_empty(&self) -> bool {
        self.raw.len() == 0 && self.hourly.len() == 0 && self.daily.len() == 0
    }
}

/// Thread-safe handle to an [`AggregationEngine`].
///
/// The reader thread records through a write lock, so a concurrent
/// snapshot sees either none or all of a `record` call.
#[derive(Clone)]
pub struct SharedEngine(Arc<RwLock<AggregationEngine>>);

impl SharedEngine {
    /// Wrap an engine.
    pub fn new(engine: AggregationEngine) -> Self {
        Self(Arc::new(RwLock::new(engine)))
    }

    /// See [`AggregationEngine::record`].
    pub fn record(&self, measurement: Measurement) -> RecordOutcome {
        self.0.write().record(measurement)
    }

    /// See [`AggregationEngine::snapshot`].
    pub fn snapshot(&self, granularity: Granularity) -> Snapshot {
        self.0.read().snapshot(granularity)
    }

    /// See [`AggregationEngine::open_buckets`].
    pub fn open_buckets(&self) -> Vec<(Granularity, SeriesPoint)> {
        self.0.read().open_buckets()
    }

    /// See [`AggregationEngine::restore`].
    pub fn restore(&self, granularity: Granularity, points: impl IntoIterator<Item = SeriesPoint>) {
        self.0.write().restore(granularity, points)
    }

    /// See [`AggregationEngine::len`].
    pub fn len(&self, granularity: Granularity) -> usize {
        self.0.read().len(granularity)
    }
}
