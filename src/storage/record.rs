//! CSV record codec for the retention logs.
//!
//! Logs carry no header row. Raw lines are `timestamp,value`; aggregate
//! lines are `bucket_start,mean,count`. Timestamps are RFC 3339 in UTC.

use crate::aggregation::{Granularity, SeriesPoint};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct RawRecord {
    timestamp: DateTime<Utc>,
    value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AggregateRecord {
    bucket_start: DateTime<Utc>,
    mean: f64,
    count: u64,
}

impl From<RawRecord> for SeriesPoint {
    fn from(r: RawRecord) -> Self {
        SeriesPoint {
            timestamp: r.timestamp,
            value: r.value,
            count: 1,
        }
    }
}

impl From<AggregateRecord> for SeriesPoint {
    fn from(r: AggregateRecord) -> Self {
        SeriesPoint {
            timestamp: r.bucket_start,
            value: r.mean,
            count: r.count,
        }
    }
}

pub(crate) fn writer<W: io::Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(inner)
}

/// Encode one point in the layout of `granularity`.
pub(crate) fn write_point<W: io::Write>(
    writer: &mut csv::Writer<W>,
    granularity: Granularity,
    point: &SeriesPoint,
) -> csv::Result<()> {
    match granularity {
        Granularity::Raw => writer.serialize(RawRecord {
            timestamp: point.timestamp,
            value: point.value,
        }),
        Granularity::Hourly | Granularity::Daily => writer.serialize(AggregateRecord {
            bucket_start: point.timestamp,
            mean: point.value,
            count: point.count,
        }),
    }
}

/// Decode every readable record in `input`.
///
/// Records that fail to decode (a line torn by a crash, hand edits) are
/// skipped with a warning. I/O errors abort the read.
pub(crate) fn read_points<R: io::Read>(
    input: R,
    granularity: Granularity,
    path: &Path,
) -> Result<Vec<SeriesPoint>, PersistenceError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    match granularity {
        Granularity::Raw => decode::<RawRecord, R>(reader, path),
        Granularity::Hourly | Granularity::Daily => decode::<AggregateRecord, R>(reader, path),
    }
}

fn decode<T, R>(mut reader: csv::Reader<R>, path: &Path) -> Result<Vec<SeriesPoint>, PersistenceError>
where
    T: DeserializeOwned + Into<SeriesPoint>,
    R: io::Read,
{
    let mut points = Vec::new();
    for result in reader.deserialize::<T>() {
        match result {
            Ok(record) => {
                let point: SeriesPoint = record.into();
                if point.value.is_finite() {
                    points.push(point);
                } else {
                    warn!(path = %path.display(), "Skipping non-finite value");
                }
            }
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                return Err(PersistenceError::csv(path, e));
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = e.position().map(|p| p.line()),
                    "Skipping unreadable record: {}",
                    e
                );
            }
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(granularity: Granularity, point: SeriesPoint) -> String {
        let mut w = writer(Vec::new());
        write_point(&mut w, granularity, &point).unwrap();
        String::from_utf8(w.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn raw_layout_has_two_columns() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 20, 0).unwrap();
        let line = encode(
            Granularity::Raw,
            SeriesPoint {
                timestamp: ts,
                value: 23.5,
                count: 1,
            },
        );
        assert_eq!(line, "2024-01-15T10:20:00Z,23.5\n");
    }

    #[test]
    fn aggregate_layout_carries_count() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let line = encode(
            Granularity::Hourly,
            SeriesPoint {
                timestamp: ts,
                value: 21.25,
                count: 4,
            },
        );
        assert_eq!(line, "2024-01-15T10:00:00Z,21.25,4\n");
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let input = "2024-01-15T10:20:00Z,23.5\nnot a record\n2024-01-15T10:2\n2024-01-15T10:21:00Z,24\n";
        let points = read_points(input.as_bytes(), Granularity::Raw, Path::new("raw.log")).unwrap();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![23.5, 24.0]);
    }
}
