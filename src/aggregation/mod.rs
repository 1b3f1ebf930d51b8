//! Retention-bounded aggregation of temperature measurements.
//!
//! Three series are maintained side by side:
//!
//! | series | point | retention |
//! |--------|-------|-----------|
//! | raw    | every measurement | 24 hours |
//! | hourly | mean per UTC hour | 30 days  |
//! | daily  | mean per UTC day  | 365 days |
//!
//! The daily mean is taken over raw measurements, so a day with an unevenly
//! sampled hour is not skewed by averaging hourly means.

pub mod engine;
pub mod series;

pub use engine::{AggregationEngine, RecordOutcome, SharedEngine, Snapshot};
pub use series::{Granularity, RetentionPolicy, SeriesPoint};
