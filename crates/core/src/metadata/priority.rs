use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::types::{FieldConflict, FieldName, FieldValue, MetadataField, MetadataSource};

/// Source ranking, globally and per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub default_priority: Vec<MetadataSource>,
    pub field_priorities: HashMap<FieldName, Vec<MetadataSource>>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            default_priority: MetadataSource::ALL.to_vec(),
            field_priorities: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub field: MetadataField,
    pub conflict: Option<FieldConflict>,
}

#[derive(Debug, Clone, Default)]
pub struct PriorityResolver {
    config: PriorityConfig,
}

impl PriorityResolver {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    /// Ranking used for `field`: its override when configured, else the
    /// default, with any unlisted source appended in canonical order.
    pub fn priority_for(&self, field: FieldName) -> Vec<MetadataSource> {
        let configured = self
            .config
            .field_priorities
            .get(&field)
            .filter(|order| !order.is_empty())
            .unwrap_or(&self.config.default_priority);

        let mut order: Vec<MetadataSource> = Vec::with_capacity(MetadataSource::ALL.len());
        for src in configured.iter().chain(self.config.default_priority.iter()) {
            if !order.contains(src) {
                order.push(*src);
            }
        }
        for src in MetadataSource::ALL {
            if !order.contains(&src) {
                order.push(src);
            }
        }
        order
    }

    pub fn resolve_field(
        &self,
        field: FieldName,
        sources: &BTreeMap<MetadataSource, Option<FieldValue>>,
    ) -> Result<Resolution> {
        let present: BTreeMap<MetadataSource, &FieldValue> = sources
            .iter()
            .filter_map(|(src, value)| value.as_ref().map(|v| (*src, v)))
            .collect();
        if present.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no non-null values offered for {field}"
            )));
        }

        let chosen = self
            .priority_for(field)
            .into_iter()
            .find(|src| present.contains_key(src))
            .ok_or_else(|| Error::InvalidInput(format!("no ranked source for {field}")))?;
        let value = present[&chosen].clone();

        let mut distinct: Vec<&FieldValue> = Vec::new();
        for v in present.values() {
            if !distinct.contains(v) {
                distinct.push(v);
            }
        }
        let conflict = if distinct.len() > 1 {
            debug!(
                field = %field,
                resolved_to = %chosen,
                candidates = present.len(),
                "metadata conflict"
            );
            Some(FieldConflict {
                field,
                sources: present.iter().map(|(s, v)| (*s, (*v).clone())).collect(),
                resolved_to: chosen,
            })
        } else {
            None
        };

        Ok(Resolution {
            field: MetadataField {
                value,
                source: chosen,
                confidence: chosen.confidence(),
                timestamp: Some(Utc::now()),
                notes: None,
            },
            conflict,
        })
    }
}
