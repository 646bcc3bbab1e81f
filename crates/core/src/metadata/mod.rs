//! Multi-source metadata consolidation.

mod consolidator;
mod extract;
mod manufacturer;
mod priority;
mod quality;
mod timezone;
mod types;

pub use consolidator::MetadataConsolidator;
pub use extract::{FilesystemExtractor, MetadataExtractor, TaggedValue};
pub use manufacturer::ManufacturerStandardizer;
pub use priority::{PriorityConfig, PriorityResolver, Resolution};
pub use quality::{MetadataQualityAssessor, QualityAssessment};
pub use timezone::TimezonePreserver;
pub use types::{
    ConsolidatedMetadata, FieldConflict, FieldName, FieldValue, MetadataField, MetadataSource,
    PreservedTimestamp,
};
