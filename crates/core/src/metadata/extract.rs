use std::path::Path;

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::metadata::types::{FieldName, FieldValue, MetadataSource, PreservedTimestamp};

/// One raw value handed over by an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedValue {
    pub field: FieldName,
    pub source: MetadataSource,
    pub value: Option<FieldValue>,
}

impl TaggedValue {
    pub fn new(field: FieldName, source: MetadataSource, value: impl Into<FieldValue>) -> Self {
        Self {
            field,
            source,
            value: Some(value.into()),
        }
    }
}

/// Boundary to the format-specific extractors (EXIF tool, document parsers,
/// media probes). Implementations translate their own tag names into
/// [`FieldName`] before returning.
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, mime_type: &str) -> bool;

    fn extract(&self, path: &Path) -> Result<Vec<TaggedValue>>;
}

/// Timestamps the filesystem keeps for every file.
///
/// Reported in local time with the host offset attached, matching what a
/// user sees in a file browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemExtractor;

impl MetadataExtractor for FilesystemExtractor {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn supports(&self, _mime_type: &str) -> bool {
        true
    }

    fn extract(&self, path: &Path) -> Result<Vec<TaggedValue>> {
        let md = std::fs::metadata(path)?;
        let mut values = Vec::new();
        if let Ok(modified) = md.modified() {
            values.push(TaggedValue::new(
                FieldName::DateModified,
                MetadataSource::Filesystem,
                local_timestamp(modified),
            ));
        }
        if let Ok(created) = md.created() {
            values.push(TaggedValue::new(
                FieldName::DateCreated,
                MetadataSource::Filesystem,
                local_timestamp(created),
            ));
        }
        Ok(values)
    }
}

fn local_timestamp(t: std::time::SystemTime) -> PreservedTimestamp {
    let local: DateTime<Local> = t.into();
    PreservedTimestamp::Aware(local.fixed_offset())
}
