use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a metadata value came from. Declaration order is the default
/// priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetadataSource {
    Exif,
    Embedded,
    Filename,
    Filesystem,
    Inferred,
    Default,
}

impl MetadataSource {
    pub const ALL: [MetadataSource; 6] = [
        MetadataSource::Exif,
        MetadataSource::Embedded,
        MetadataSource::Filename,
        MetadataSource::Filesystem,
        MetadataSource::Inferred,
        MetadataSource::Default,
    ];

    pub fn confidence(self) -> f64 {
        match self {
            MetadataSource::Exif => 1.0,
            MetadataSource::Embedded => 0.9,
            MetadataSource::Filename => 0.6,
            MetadataSource::Filesystem => 0.4,
            MetadataSource::Inferred => 0.3,
            MetadataSource::Default => 0.2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetadataSource::Exif => "EXIF",
            MetadataSource::Embedded => "EMBEDDED",
            MetadataSource::Filename => "FILENAME",
            MetadataSource::Filesystem => "FILESYSTEM",
            MetadataSource::Inferred => "INFERRED",
            MetadataSource::Default => "DEFAULT",
        }
    }
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MetadataSource::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown metadata source: {s}")))
    }
}

macro_rules! field_names {
    ($($variant:ident => $name:literal, $is_date:literal;)+) => {
        /// Canonical metadata field names. Extractors normalize their
        /// tool-specific tag names into these before anything is resolved.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum FieldName {
            $($variant,)+
        }

        impl FieldName {
            pub const ALL: &'static [FieldName] = &[$(FieldName::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(FieldName::$variant => $name,)+
                }
            }

            pub fn is_date(self) -> bool {
                match self {
                    $(FieldName::$variant => $is_date,)+
                }
            }
        }
    };
}

field_names! {
    DateTaken => "date_taken", true;
    DateCreated => "date_created", true;
    DateModified => "date_modified", true;
    DeviceMake => "device_make", false;
    DeviceModel => "device_model", false;
    LensModel => "lens_model", false;
    GpsLatitude => "gps_latitude", false;
    GpsLongitude => "gps_longitude", false;
    GpsAltitude => "gps_altitude", false;
    Title => "title", false;
    Author => "author", false;
    Description => "description", false;
    Keywords => "keywords", false;
    Width => "width", false;
    Height => "height", false;
    Orientation => "orientation", false;
    Duration => "duration", false;
    Artist => "artist", false;
    Album => "album", false;
    PageCount => "page_count", false;
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        FieldName::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidInput(format!("unknown metadata field: {s}")))
    }
}

/// A timestamp exactly as the source recorded it: naive values stay naive,
/// offset-bearing values keep their offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PreservedTimestamp {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

impl PreservedTimestamp {
    pub fn is_aware(&self) -> bool {
        matches!(self, PreservedTimestamp::Aware(_))
    }

    /// The wall-clock reading, ignoring any offset.
    pub fn local(&self) -> NaiveDateTime {
        match self {
            PreservedTimestamp::Naive(t) => *t,
            PreservedTimestamp::Aware(t) => t.naive_local(),
        }
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        match self {
            PreservedTimestamp::Naive(_) => None,
            PreservedTimestamp::Aware(t) => Some(*t.offset()),
        }
    }
}

impl fmt::Display for PreservedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreservedTimestamp::Naive(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%S%.f")),
            PreservedTimestamp::Aware(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(PreservedTimestamp),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&PreservedTimestamp> {
        match self {
            FieldValue::Timestamp(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Timestamp(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<PreservedTimestamp> for FieldValue {
    fn from(v: PreservedTimestamp) -> Self {
        FieldValue::Timestamp(v)
    }
}

/// A resolved value with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataField {
    pub value: FieldValue,
    pub source: MetadataSource,
    pub confidence: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: FieldName,
    pub sources: BTreeMap<MetadataSource, FieldValue>,
    pub resolved_to: MetadataSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedMetadata {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub mime_type: String,
    pub checksum: String,
    pub fields: BTreeMap<FieldName, MetadataField>,
    pub quality_score: f64,
    pub completeness_score: f64,
    pub confidence_score: f64,
    pub processors_used: Vec<String>,
    pub conflicts_detected: Vec<FieldConflict>,
    pub processing_errors: Vec<String>,
}

impl ConsolidatedMetadata {
    pub fn new(
        file_path: impl Into<PathBuf>,
        file_size: u64,
        mime_type: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            file_size,
            mime_type: mime_type.into(),
            checksum: checksum.into(),
            fields: BTreeMap::new(),
            quality_score: 0.0,
            completeness_score: 0.0,
            confidence_score: 0.0,
            processors_used: Vec::new(),
            conflicts_detected: Vec::new(),
            processing_errors: Vec::new(),
        }
    }

    pub fn get(&self, field: FieldName) -> Option<&MetadataField> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: FieldName) -> Option<&FieldValue> {
        self.fields.get(&field).map(|f| &f.value)
    }

    /// Best available capture date: taken, then created, then modified.
    pub fn primary_date(&self) -> Option<&PreservedTimestamp> {
        [
            FieldName::DateTaken,
            FieldName::DateCreated,
            FieldName::DateModified,
        ]
        .into_iter()
        .find_map(|f| self.value(f).and_then(FieldValue::as_timestamp))
    }
}
