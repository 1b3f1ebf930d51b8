//! Measurement type and frame parser.
//!
//! A frame is one line of device output, for example `TEMP:23.5 HUM:40`.
//! The parser grammar is:
//!
//! ```text
//! frame  := ... marker field (whitespace ... | end)
//! marker := fixed text, "TEMP:" by default
//! field  := non-whitespace characters, parsed as a finite f64
//! ```
//!
//! A frame without the marker is not a data frame and yields `Ok(None)`.
//! A frame with the marker but no finite number yields [`MalformedMeasurement`].

use crate::error::MalformedMeasurement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed temperature reading stamped with its ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Ingestion time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Temperature in degrees Celsius.
    pub value: f64,
}

impl Measurement {
    /// Create a measurement.
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Extracts the temperature field from a frame.
#[derive(Debug, Clone)]
pub struct FrameParser {
    marker: String,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new("TEMP:")
    }
}

impl FrameParser {
    /// Parser looking for `marker`.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// The marker this parser looks for.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Extract the temperature value from `frame`.
    ///
    /// Only the first occurrence of the marker is considered.
    pub fn parse(&self, frame: &str) -> Result<Option<f64>, MalformedMeasurement> {
        let Some(pos) = frame.find(&self.marker) else {
            return Ok(None);
        };

        let rest = &frame[pos + self.marker.len()..];
        let field = rest
            .split(char::is_whitespace)
            .next()
            .unwrap_or_default();

        let malformed = |reason: &str| MalformedMeasurement {
            frame: frame.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if field.is_empty() {
            return Err(malformed("is empty"));
        }

        match field.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            Ok(_) => Err(malformed("is not finite")),
            Err(e) => Err(malformed(&format!("is not a number ({e})"))),
        }
    }

    /// Parse `frame` and stamp the value with `now`.
    pub fn measure(
        &self,
        frame: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Measurement>, MalformedMeasurement> {
        Ok(self.parse(frame)?.map(|value| Measurement::new(now, value)))
    }
}
