use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::PriorityConfig;
use crate::models::BatchMoveRequest;
use crate::mover::DEFAULT_SPACE_SAFETY_MARGIN;

const STATE_DIR: &str = ".vault";
const INDEX_FILE: &str = "index.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub parallel: bool,
    pub max_workers: usize,
    pub stop_on_first_error: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: 4,
            stop_on_first_error: false,
        }
    }
}

impl BatchSettings {
    /// Applies these settings to a request built from `operations`.
    pub fn request(&self, operations: Vec<crate::models::BatchMoveItem>) -> BatchMoveRequest {
        let mut request = if self.parallel {
            BatchMoveRequest::parallel(operations, self.max_workers)
        } else {
            BatchMoveRequest::sequential(operations)
        };
        request.stop_on_first_error = self.stop_on_first_error;
        request
    }
}

/// Vault settings, read from a JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub vault_root: PathBuf,
    pub index_path: Option<PathBuf>,
    pub quarantine_root: Option<PathBuf>,
    pub duplicates_root: Option<PathBuf>,
    pub priority: PriorityConfig,
    /// raw manufacturer string -> display name
    pub manufacturer_aliases: HashMap<String, String>,
    pub batch: BatchSettings,
    pub space_safety_margin: f64,
    pub recursive: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_root: PathBuf::from("vault"),
            index_path: None,
            quarantine_root: None,
            duplicates_root: None,
            priority: PriorityConfig::default(),
            manufacturer_aliases: HashMap::new(),
            batch: BatchSettings::default(),
            space_safety_margin: DEFAULT_SPACE_SAFETY_MARGIN,
            recursive: true,
        }
    }
}

impl VaultConfig {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            vault_root: root.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=10.0).contains(&self.space_safety_margin) {
            return Err(Error::InvalidInput(format!(
                "space_safety_margin out of range: {}",
                self.space_safety_margin
            )));
        }
        if self.batch.parallel && self.batch.max_workers < 2 {
            return Err(Error::InvalidInput(
                "batch.parallel needs max_workers >= 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.vault_root.join(STATE_DIR).join(INDEX_FILE))
    }

    pub fn quarantine_root(&self) -> PathBuf {
        self.quarantine_root
            .clone()
            .unwrap_or_else(|| self.vault_root.join("quarantine"))
    }

    pub fn duplicates_root(&self) -> PathBuf {
        self.duplicates_root
            .clone()
            .unwrap_or_else(|| self.vault_root.join("duplicates"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldName, MetadataSource};

    #[test]
    fn defaults_derive_layout_from_root() {
        let cfg = VaultConfig::for_root("/data/vault");
        assert_eq!(cfg.index_path(), PathBuf::from("/data/vault/.vault/index.db"));
        assert_eq!(cfg.quarantine_root(), PathBuf::from("/data/vault/quarantine"));
        assert_eq!(cfg.duplicates_root(), PathBuf::from("/data/vault/duplicates"));
        assert!(cfg.recursive);
        assert_eq!(cfg.space_safety_margin, 0.10);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
              "vault_root": "/v",
              "priority": { "field_priorities": { "date_taken": ["FILENAME", "EXIF"] } },
              "manufacturer_aliases": { "ACME CORP": "Acme" },
              "batch": { "parallel": true }
            }"#,
        )
        .unwrap();
        let cfg = VaultConfig::load(&path).unwrap();
        assert_eq!(cfg.vault_root, PathBuf::from("/v"));
        assert_eq!(cfg.batch.max_workers, 4);
        assert_eq!(cfg.priority.default_priority, MetadataSource::ALL.to_vec());
        assert_eq!(
            cfg.priority.field_priorities[&FieldName::DateTaken][0],
            MetadataSource::Filename
        );
        assert_eq!(cfg.manufacturer_aliases["ACME CORP"], "Acme");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            VaultConfig::load(&dir.path().join("nope.json")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn bad_worker_count_is_rejected() {
        let mut cfg = VaultConfig::default();
        cfg.batch.parallel = true;
        cfg.batch.max_workers = 1;
        assert!(cfg.validate().is_err());
    }
}
