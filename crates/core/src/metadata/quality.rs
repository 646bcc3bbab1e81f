use std::collections::BTreeMap;

use serde::Serialize;

use crate::metadata::types::{ConsolidatedMetadata, FieldName, MetadataSource};

const HIGH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub total_fields: usize,
    pub populated_fields: usize,
    pub completeness: f64,
    pub confidence: f64,
    pub high_confidence_fields: usize,
    pub source_breakdown: BTreeMap<MetadataSource, usize>,
    pub quality_score: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataQualityAssessor;

impl MetadataQualityAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, metadata: &ConsolidatedMetadata) -> QualityAssessment {
        let total_fields = FieldName::ALL.len();
        let mut populated_fields = 0;
        let mut confidence_sum = 0.0;
        let mut high_confidence_fields = 0;
        let mut source_breakdown = BTreeMap::new();

        for field in FieldName::ALL {
            let Some(resolved) = metadata.get(*field) else {
                continue;
            };
            populated_fields += 1;
            confidence_sum += resolved.confidence;
            if resolved.confidence > HIGH_CONFIDENCE {
                high_confidence_fields += 1;
            }
            *source_breakdown.entry(resolved.source).or_insert(0) += 1;
        }

        let completeness = populated_fields as f64 / total_fields as f64;
        let confidence = if populated_fields == 0 {
            0.0
        } else {
            confidence_sum / populated_fields as f64
        };

        QualityAssessment {
            total_fields,
            populated_fields,
            completeness,
            confidence,
            high_confidence_fields,
            source_breakdown,
            quality_score: 0.5 * completeness + 0.5 * confidence,
        }
    }
}
