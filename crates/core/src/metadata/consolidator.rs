use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash::IntegrityVerifier;
use crate::metadata::extract::{FilesystemExtractor, MetadataExtractor, TaggedValue};
use crate::metadata::manufacturer::ManufacturerStandardizer;
use crate::metadata::priority::{PriorityConfig, PriorityResolver};
use crate::metadata::quality::{MetadataQualityAssessor, QualityAssessment};
use crate::metadata::timezone::TimezonePreserver;
use crate::metadata::types::{ConsolidatedMetadata, FieldName, FieldValue, MetadataSource};

const FALLBACK_MIME: &str = "application/octet-stream";

type SourceValues = BTreeMap<MetadataSource, Option<FieldValue>>;

pub struct MetadataConsolidator {
    resolver: PriorityResolver,
    timezone: TimezonePreserver,
    manufacturer: ManufacturerStandardizer,
    assessor: MetadataQualityAssessor,
    verifier: IntegrityVerifier,
    extractors: Vec<Box<dyn MetadataExtractor>>,
}

impl Default for MetadataConsolidator {
    fn default() -> Self {
        Self::new(PriorityConfig::default(), &HashMap::new())
    }
}

impl MetadataConsolidator {
    /// A consolidator with only the built-in filesystem extractor.
    pub fn new(priority: PriorityConfig, manufacturer_aliases: &HashMap<String, String>) -> Self {
        Self {
            resolver: PriorityResolver::new(priority),
            timezone: TimezonePreserver::new(),
            manufacturer: ManufacturerStandardizer::new(manufacturer_aliases),
            assessor: MetadataQualityAssessor::new(),
            verifier: IntegrityVerifier::new(),
            extractors: vec![Box::new(FilesystemExtractor)],
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn MetadataExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn resolver(&self) -> &PriorityResolver {
        &self.resolver
    }

    pub fn consolidate(&self, path: &Path) -> Result<ConsolidatedMetadata> {
        let md = match std::fs::metadata(path) {
            Ok(md) => md,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !md.is_file() {
            return Err(Error::InvalidInput(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let checksum = self.verifier.compute_hash(path)?;
        let mime_type = infer::get_from_path(path)
            .ok()
            .flatten()
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        let mut processors = Vec::new();
        let mut errors = Vec::new();
        let mut values = Vec::new();
        for extractor in &self.extractors {
            if !extractor.supports(&mime_type) {
                continue;
            }
            processors.push(extractor.name().to_string());
            match extractor.extract(path) {
                Ok(mut v) => values.append(&mut v),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        extractor = extractor.name(),
                        error = %e,
                        "metadata extractor failed"
                    );
                    errors.push(format!("{}: {e}", extractor.name()));
                }
            }
        }

        let mut metadata = ConsolidatedMetadata::new(path, md.len(), mime_type, checksum);
        metadata.processors_used = processors;
        metadata.processing_errors = errors;
        self.merge_values(&mut metadata, values);
        Ok(metadata)
    }

    /// Resolves tagged values into `metadata` and refreshes its scores.
    pub fn merge_values(&self, metadata: &mut ConsolidatedMetadata, values: Vec<TaggedValue>) {
        let mut by_field: BTreeMap<FieldName, SourceValues> = BTreeMap::new();
        for tagged in values {
            let slot = by_field
                .entry(tagged.field)
                .or_default()
                .entry(tagged.source)
                .or_insert(None);
            if slot.is_none() {
                *slot = tagged.value;
            }
        }

        for (field, mut sources) in by_field {
            self.normalize_sources(field, &mut sources, &mut metadata.processing_errors);
            if sources.values().all(Option::is_none) {
                continue;
            }
            match self.resolver.resolve_field(field, &sources) {
                Ok(resolution) => {
                    if let Some(conflict) = resolution.conflict {
                        metadata.conflicts_detected.push(conflict);
                    }
                    metadata.fields.insert(field, resolution.field);
                }
                Err(e) => metadata.processing_errors.push(format!("{field}: {e}")),
            }
        }

        let quality = self.assess_quality(metadata);
        metadata.completeness_score = quality.completeness;
        metadata.confidence_score = quality.confidence;
        metadata.quality_score = quality.quality_score;
        debug!(
            path = %metadata.file_path.display(),
            fields = metadata.fields.len(),
            conflicts = metadata.conflicts_detected.len(),
            quality = metadata.quality_score,
            "metadata consolidated"
        );
    }

    pub fn assess_quality(&self, metadata: &ConsolidatedMetadata) -> QualityAssessment {
        self.assessor.assess(metadata)
    }

    // Dates and manufacturer names are normalized per source so that
    // spelling differences do not register as conflicts.
    fn normalize_sources(&self, field: FieldName, sources: &mut SourceValues, errors: &mut Vec<String>) {
        for (source, slot) in sources.iter_mut() {
            let Some(value) = slot.take() else {
                continue;
            };
            *slot = if field.is_date() {
                match self.timezone.preserve(&value) {
                    Ok(t) => Some(FieldValue::Timestamp(t)),
                    Err(e) => {
                        errors.push(format!("{field} from {source}: {e}"));
                        None
                    }
                }
            } else if field == FieldName::DeviceMake {
                match &value {
                    FieldValue::Text(raw) => {
                        let name = self.manufacturer.standardize(raw);
                        (!name.is_empty()).then_some(FieldValue::Text(name))
                    }
                    _ => Some(value),
                }
            } else {
                Some(value)
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::PreservedTimestamp;

    fn meta() -> ConsolidatedMetadata {
        ConsolidatedMetadata::new("/x/photo.jpg", 10, "image/jpeg", "a".repeat(64))
    }

    #[test]
    fn naive_dates_survive_consolidation() {
        let c = MetadataConsolidator::default();
        let mut m = meta();
        c.merge_values(
            &mut m,
            vec![TaggedValue::new(
                FieldName::DateTaken,
                MetadataSource::Exif,
                "2023:04:15 12:34:56",
            )],
        );
        let taken = m.value(FieldName::DateTaken).unwrap();
        assert!(matches!(
            taken,
            FieldValue::Timestamp(PreservedTimestamp::Naive(_))
        ));
    }

    #[test]
    fn equal_dates_in_different_formats_do_not_conflict() {
        let c = MetadataConsolidator::default();
        let mut m = meta();
        c.merge_values(
            &mut m,
            vec![
                TaggedValue::new(FieldName::DateTaken, MetadataSource::Exif, "2023:04:15 12:34:56"),
                TaggedValue::new(FieldName::DateTaken, MetadataSource::Filename, "2023-04-15T12:34:56"),
            ],
        );
        assert!(m.conflicts_detected.is_empty());
    }

    #[test]
    fn unparseable_date_is_reported_and_dropped() {
        let c = MetadataConsolidator::default();
        let mut m = meta();
        c.merge_values(
            &mut m,
            vec![TaggedValue::new(FieldName::DateTaken, MetadataSource::Exif, "not a date")],
        );
        assert!(m.get(FieldName::DateTaken).is_none());
        assert_eq!(m.processing_errors.len(), 1);
    }

    #[test]
    fn device_make_is_standardized() {
        let c = MetadataConsolidator::default();
        let mut m = meta();
        c.merge_values(
            &mut m,
            vec![
                TaggedValue::new(FieldName::DeviceMake, MetadataSource::Exif, "NIKON CORPORATION"),
                TaggedValue::new(FieldName::DeviceMake, MetadataSource::Embedded, "Nikon"),
            ],
        );
        assert_eq!(m.value(FieldName::DeviceMake), Some(&FieldValue::from("Nikon")));
        assert!(m.conflicts_detected.is_empty());
    }

    #[test]
    fn first_value_per_source_wins() {
        let c = MetadataConsolidator::default();
        let mut m = meta();
        c.merge_values(
            &mut m,
            vec![
                TaggedValue::new(FieldName::Title, MetadataSource::Embedded, "first"),
                TaggedValue::new(FieldName::Title, MetadataSource::Embedded, "second"),
            ],
        );
        assert_eq!(m.value(FieldName::Title), Some(&FieldValue::from("first")));
    }

    #[test]
    fn scores_are_filled_in() {
        let c = MetadataConsolidator::default();
        let mut m = meta();
        c.merge_values(
            &mut m,
            vec![
                TaggedValue::new(FieldName::Title, MetadataSource::Exif, "t"),
                TaggedValue::new(FieldName::Artist, MetadataSource::Exif, "a"),
            ],
        );
        assert!((m.completeness_score - 0.1).abs() < 1e-9);
        assert_eq!(m.confidence_score, 1.0);
        assert!((m.quality_score - 0.55).abs() < 1e-9);
    }
}
