use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::metadata::types::{FieldValue, PreservedTimestamp};

// Tried in order; the first match wins.
const AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y:%m:%d %H:%M:%S%:z",
    "%Y:%m:%d %H:%M:%S%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y:%m:%d %H:%M:%S",
];

const FRACTIONAL_AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y:%m:%d %H:%M:%S%.f%:z",
];

const FRACTIONAL_NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y:%m:%d %H:%M:%S%.f",
];

/// Keeps timestamps in the zone the source recorded them in.
///
/// Nothing here converts to UTC. A naive EXIF `DateTimeOriginal` stays a
/// naive wall-clock reading; a value with an offset keeps that offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimezonePreserver;

impl TimezonePreserver {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, input: &str) -> Result<PreservedTimestamp> {
        let s = input.trim().trim_end_matches('\0');
        if s.is_empty() {
            return Err(Error::InvalidInput("empty timestamp".to_string()));
        }

        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Ok(PreservedTimestamp::Aware(t));
        }
        for fmt in AWARE_FORMATS {
            if let Ok(t) = DateTime::parse_from_str(s, fmt) {
                return Ok(PreservedTimestamp::Aware(t));
            }
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(PreservedTimestamp::Naive(t));
            }
        }
        for fmt in FRACTIONAL_AWARE_FORMATS {
            if let Ok(t) = DateTime::parse_from_str(s, fmt) {
                return Ok(PreservedTimestamp::Aware(t));
            }
        }
        for fmt in FRACTIONAL_NAIVE_FORMATS {
            if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(PreservedTimestamp::Naive(t));
            }
        }

        Err(Error::InvalidInput(format!("unrecognized timestamp: {input:?}")))
    }

    /// Coerces a resolved value into a timestamp without shifting its zone.
    /// Integers are Unix seconds.
    pub fn preserve(&self, value: &FieldValue) -> Result<PreservedTimestamp> {
        match value {
            FieldValue::Timestamp(t) => Ok(*t),
            FieldValue::Text(s) => self.parse(s),
            FieldValue::Integer(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .map(|t| PreservedTimestamp::Aware(t.fixed_offset()))
                .ok_or_else(|| Error::InvalidInput(format!("timestamp out of range: {secs}"))),
            other => Err(Error::InvalidInput(format!(
                "value is not a timestamp: {other}"
            ))),
        }
    }
}
