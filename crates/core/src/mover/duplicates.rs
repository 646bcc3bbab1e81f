use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{ClaimOutcome, ContentClaim, FileIndex};
use crate::error::Result;
use crate::models::{DuplicateRecord, FileRecord};
use crate::mover::fsops::{relocate, RelocateFn};
use crate::quarantine::sanitize_filename;
use crate::registry::PathReservations;

/// The mover's view of the content store.
pub trait DuplicateHandler: Send + Sync {
    /// The stored file whose bytes match `checksum`, unless that file is
    /// `source` itself or no longer exists.
    fn find_original(&self, source: &Path, checksum: &str) -> Result<Option<FileRecord>>;

    /// Read-only membership test used by previews.
    fn is_known(&self, checksum: &str) -> Result<bool>;

    /// Atomically either reserves `checksum` for a move of `source` to
    /// `destination` or reports the live file that already holds it.
    fn claim(
        &self,
        source: &Path,
        destination: &Path,
        checksum: &str,
        size_bytes: u64,
    ) -> Result<ClaimOutcome>;

    /// Gives back a claim whose move did not complete.
    fn release_claim(&self, claim: &ContentClaim) -> Result<()>;

    /// Files `source` away as a copy of `original` and records the fact.
    fn handle_duplicate(
        &self,
        source: &Path,
        original: &FileRecord,
        checksum: &str,
    ) -> Result<DuplicateRecord>;

    fn register_placement(
        &self,
        source: &Path,
        destination: &Path,
        checksum: &str,
        size_bytes: u64,
    ) -> Result<FileRecord>;
}

/// Duplicate handling backed by the [`FileIndex`], parking copies under
/// `<root>/<YYYY-MM-DD>/<hash[0..4]>/`.
pub struct IndexedDuplicateHandler {
    index: Arc<FileIndex>,
    root: PathBuf,
    reservations: Arc<PathReservations>,
    relocate: RelocateFn,
}


impl IndexedDuplicateHandler {
    pub fn new(
        index: Arc<FileIndex>,
        root: impl Into<PathBuf>,
        reservations: Arc<PathReservations>,
    ) -> Self {
        Self {
            index,
            root: root.into(),
            reservations,
            relocate,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_relocator(mut self, relocate: RelocateFn) -> Self {
        self.relocate = relocate;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_for(&self, checksum: &str) -> PathBuf {
        let day = Local::now().format("%Y-%m-%d").to_string();
        let prefix: String = checksum.chars().take(4).collect();
        self.root.join(day).join(prefix.to_ascii_lowercase())
    }
}

impl DuplicateHandler for IndexedDuplicateHandler {
    fn find_original(&self, source: &Path, checksum: &str) -> Result<Option<FileRecord>> {
        let found = self.index.canonical_for(checksum)?;
        Ok(found.filter(|rec| rec.file_path != source && rec.file_path.is_file()))
    }

    fn is_known(&self, checksum: &str) -> Result<bool> {
        self.index.checksum_exists(checksum)
    }

    fn claim(
        &self,
        source: &Path,
        destination: &Path,
        checksum: &str,
        size_bytes: u64,
    ) -> Result<ClaimOutcome> {
        let modified_at = fs::metadata(source)
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        self.index
            .claim_content(source, destination, checksum, size_bytes, modified_at)
    }

    fn release_claim(&self, claim: &ContentClaim) -> Result<()> {
        self.index.release_claim(claim)
    }

    fn handle_duplicate(
        &self,
        source: &Path,
        original: &FileRecord,
        checksum: &str,
    ) -> Result<DuplicateRecord> {
        let source_md = fs::metadata(source)?;
        let modified_at = source_md.modified().ok().map(DateTime::<Utc>::from);

        let dir = self.bucket_for(checksum);
        fs::create_dir_all(&dir)?;
        let name = source
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .unwrap_or_else(|| sanitize_filename(""));
        let slot = self.reservations.reserve(&dir, &name);
        if (self.relocate)(source, slot.path())?.source_retained() {
            warn!(
                path = %source.display(),
                parked_at = %slot.path().display(),
                "duplicate copied but the source could not be removed"
            );
        }

        let record = DuplicateRecord {
            duplicate_id: Uuid::new_v4(),
            original_file_id: original.id,
            duplicate_path: slot.path().to_path_buf(),
            original_path: original.file_path.clone(),
            file_hash: checksum.to_ascii_lowercase(),
            detected_at: Utc::now(),
            metadata_diff: diff_against(original, source, modified_at),
        };
        self.index
            .record_duplicate(source, &record, source_md.len(), modified_at)?;
        info!(
            path = %source.display(),
            original = %original.file_path.display(),
            parked_at = %record.duplicate_path.display(),
            checksum = %record.file_hash,
            "duplicate filed"
        );
        Ok(record)
    }

    fn register_placement(
        &self,
        source: &Path,
        destination: &Path,
        checksum: &str,
        size_bytes: u64,
    ) -> Result<FileRecord> {
        let modified_at = fs::metadata(destination)
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        self.index
            .register_placement(source, destination, checksum, size_bytes, modified_at)
    }
}

// field -> (original, duplicate)
fn diff_against(
    original: &FileRecord,
    source: &Path,
    modified_at: Option<DateTime<Utc>>,
) -> BTreeMap<String, (String, String)> {
    let mut diff = BTreeMap::new();
    let original_name = original
        .file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let source_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if original_name != source_name {
        diff.insert("file_name".to_string(), (original_name, source_name));
    }

    let fmt = |t: Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
    if original.modification_time != modified_at {
        diff.insert(
            "modification_time".to_string(),
            (fmt(original.modification_time), fmt(modified_at)),
        );
    }
    diff
}
