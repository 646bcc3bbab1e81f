use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metadata::ConsolidatedMetadata;
use crate::quarantine::QuarantineRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processed,
    Duplicate,
    Error,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processed => "processed",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Error => "error",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processed" => Ok(FileStatus::Processed),
            "duplicate" => Ok(FileStatus::Duplicate),
            "error" => Ok(FileStatus::Error),
            other => Err(Error::InvalidInput(format!("unknown file status: {other}"))),
        }
    }
}

/// One ingested file, keyed uniquely by its absolute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub file_path: PathBuf,
    pub checksum: String,
    pub file_size: u64,
    pub modification_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub checksum: String,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub duplicate_id: Uuid,
    /// Index id of the record the incoming file duplicates.
    pub original_file_id: i64,
    pub duplicate_path: PathBuf,
    pub original_path: PathBuf,
    pub file_hash: String,
    pub detected_at: DateTime<Utc>,
    /// field -> (original value, duplicate value)
    pub metadata_diff: std::collections::BTreeMap<String, (String, String)>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub files_seen: u64,
    pub files_ingested: u64,
    pub duplicates_found: u64,
    pub files_skipped: u64,
    pub errors: u64,
    pub bytes_processed: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl IngestStats {
    pub fn merge(&mut self, other: &IngestStats) {
        self.files_seen += other.files_seen;
        self.files_ingested += other.files_ingested;
        self.duplicates_found += other.duplicates_found;
        self.files_skipped += other.files_skipped;
        self.errors += other.errors;
        self.bytes_processed += other.bytes_processed;
        self.elapsed += other.elapsed;
        self.interrupted |= other.interrupted;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Pending,
    InProgress,
    Verifying,
    Completed,
    Failed,
    RolledBack,
    Quarantined,
}

impl MoveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MoveStatus::Pending => "pending",
            MoveStatus::InProgress => "in_progress",
            MoveStatus::Verifying => "verifying",
            MoveStatus::Completed => "completed",
            MoveStatus::Failed => "failed",
            MoveStatus::RolledBack => "rolled_back",
            MoveStatus::Quarantined => "quarantined",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MoveStatus::Completed
                | MoveStatus::Failed
                | MoveStatus::RolledBack
                | MoveStatus::Quarantined
        )
    }
}

impl fmt::Display for MoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOperation {
    pub operation_id: Uuid,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub file_hash: String,
    pub file_size: u64,
    pub status: MoveStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub rollback_attempted: bool,
    pub rollback_success: bool,
}

impl MoveOperation {
    pub fn new(
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
        file_hash: impl Into<String>,
        file_size: u64,
    ) -> Result<Self> {
        let source_path = source_path.into();
        let destination_path = destination_path.into();
        if source_path == destination_path {
            return Err(Error::InvalidInput(format!(
                "source and destination are the same path: {}",
                source_path.display()
            )));
        }
        let file_hash = file_hash.into().to_ascii_lowercase();
        if file_hash.len() != 64 || !file_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!(
                "file hash must be 64 hex characters, got {file_hash:?}"
            )));
        }
        Ok(Self {
            operation_id: Uuid::new_v4(),
            source_path,
            destination_path,
            file_hash,
            file_size,
            status: MoveStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            rollback_attempted: false,
            rollback_success: false,
        })
    }

    pub fn start(&mut self) {
        self.status = MoveStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn begin_verify(&mut self) {
        self.status = MoveStatus::Verifying;
    }

    pub fn complete(&mut self) {
        self.finish(MoveStatus::Completed, None);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.finish(MoveStatus::Failed, Some(message.into()));
    }

    pub fn mark_rolled_back(&mut self, message: impl Into<String>) {
        self.rollback_attempted = true;
        self.rollback_success = true;
        self.finish(MoveStatus::RolledBack, Some(message.into()));
    }

    pub fn mark_quarantined(&mut self) {
        self.status = MoveStatus::Quarantined;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    fn finish(&mut self, status: MoveStatus, message: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        if message.is_some() {
            self.error_message = message;
        }
    }
}

/// Outcome of one `move_file` call.
///
/// Build through the constructors; they keep `success`, `error` and the
/// duplicate/quarantine flags consistent.
#[derive(Debug, Clone, Serialize)]
pub struct MoveResult {
    pub success: bool,
    pub operation: Option<MoveOperation>,
    pub actual_destination: Option<PathBuf>,
    pub is_duplicate: bool,
    pub is_quarantined: bool,
    pub execution_time_ms: f64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub duplicate: Option<DuplicateRecord>,
    pub quarantine: Option<QuarantineRecord>,
}

impl MoveResult {
    pub fn moved(operation: MoveOperation, destination: PathBuf, elapsed: Duration) -> Self {
        Self {
            success: true,
            operation: Some(operation),
            actual_destination: Some(destination),
            is_duplicate: false,
            is_quarantined: false,
            execution_time_ms: millis(elapsed),
            error: None,
            warnings: Vec::new(),
            duplicate: None,
            quarantine: None,
        }
    }

    pub fn duplicate(operation: MoveOperation, record: DuplicateRecord, elapsed: Duration) -> Self {
        Self {
            success: true,
            operation: Some(operation),
            actual_destination: Some(record.duplicate_path.clone()),
            is_duplicate: true,
            is_quarantined: false,
            execution_time_ms: millis(elapsed),
            error: None,
            warnings: Vec::new(),
            duplicate: Some(record),
            quarantine: None,
        }
    }

    pub fn quarantined(
        operation: MoveOperation,
        record: QuarantineRecord,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            operation: Some(operation),
            actual_destination: None,
            is_duplicate: false,
            is_quarantined: true,
            execution_time_ms: millis(elapsed),
            error: Some(error.into()),
            warnings: Vec::new(),
            duplicate: None,
            quarantine: Some(record),
        }
    }

    pub fn failed(
        operation: Option<MoveOperation>,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            operation,
            actual_destination: None,
            is_duplicate: false,
            is_quarantined: false,
            execution_time_ms: millis(elapsed),
            error: Some(error.into()),
            warnings: Vec::new(),
            duplicate: None,
            quarantine: None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

#[derive(Debug, Clone)]
pub struct BatchMoveItem {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub metadata: Option<ConsolidatedMetadata>,
}

impl BatchMoveItem {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ConsolidatedMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone)]
pub struct BatchMoveRequest {
    pub operations: Vec<BatchMoveItem>,
    pub parallel: bool,
    pub max_workers: usize,
    pub stop_on_first_error: bool,
    pub verify_space: bool,
}

impl BatchMoveRequest {
    pub fn sequential(operations: Vec<BatchMoveItem>) -> Self {
        Self {
            operations,
            parallel: false,
            max_workers: 1,
            stop_on_first_error: false,
            verify_space: true,
        }
    }

    pub fn parallel(operations: Vec<BatchMoveItem>, max_workers: usize) -> Self {
        Self {
            operations,
            parallel: true,
            max_workers,
            stop_on_first_error: false,
            verify_space: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel && self.max_workers < 2 {
            return Err(Error::InvalidInput(format!(
                "parallel batch needs at least 2 workers, got {}",
                self.max_workers
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMoveResult {
    pub batch_id: Uuid,
    /// Operations actually attempted.
    pub total_operations: usize,
    pub successful: usize,
    pub duplicates: usize,
    pub quarantined: usize,
    pub failed: usize,
    /// Operations skipped by stop-on-first-error or interruption.
    pub not_attempted: usize,
    pub total_time_ms: f64,
    pub average_time_ms: f64,
    pub interrupted: bool,
    pub results: Vec<MoveResult>,
}

impl BatchMoveResult {
    pub fn from_results(
        batch_id: Uuid,
        results: Vec<MoveResult>,
        not_attempted: usize,
        interrupted: bool,
    ) -> Self {
        let mut successful = 0;
        let mut duplicates = 0;
        let mut quarantined = 0;
        let mut failed = 0;
        let mut total_time_ms = 0.0;
        for result in &results {
            total_time_ms += result.execution_time_ms;
            if result.is_duplicate {
                duplicates += 1;
            } else if result.success {
                successful += 1;
            } else if result.is_quarantined {
                quarantined += 1;
            } else {
                failed += 1;
            }
        }
        let total_operations = results.len();
        let average_time_ms = if total_operations == 0 {
            0.0
        } else {
            total_time_ms / total_operations as f64
        };
        Self {
            batch_id,
            total_operations,
            successful,
            duplicates,
            quarantined,
            failed,
            not_attempted,
            total_time_ms,
            average_time_ms,
            interrupted,
            results,
        }
    }
}

/// Read-only assessment of what `move_file` would do.
#[derive(Debug, Clone, Serialize)]
pub struct MovePreview {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub source_exists: bool,
    pub file_size: Option<u64>,
    pub file_hash: Option<String>,
    pub likely_duplicate: bool,
    pub duplicate_of: Option<PathBuf>,
    pub destination_exists: bool,
    pub destination_writable: bool,
    pub would_succeed: bool,
    pub warnings: Vec<String>,
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> String {
        "ab".repeat(32)
    }

    #[test]
    fn operation_rejects_same_path() {
        let err = MoveOperation::new("/a/b", "/a/b", hash(), 1).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn operation_rejects_bad_hash() {
        assert!(MoveOperation::new("/a", "/b", "xyz", 1).is_err());
    }

    #[test]
    fn operation_normalizes_hash_case() {
        let op = MoveOperation::new("/a", "/b", hash().to_uppercase(), 1).unwrap();
        assert_eq!(op.file_hash, hash());
        assert_eq!(op.status, MoveStatus::Pending);
    }

    #[test]
    fn lifecycle_reaches_terminal_state() {
        let mut op = MoveOperation::new("/a", "/b", hash(), 1).unwrap();
        op.start();
        assert!(op.started_at.is_some());
        op.begin_verify();
        assert!(!op.status.is_terminal());
        op.complete();
        assert!(op.status.is_terminal());
        assert!(op.completed_at.is_some());
    }

    #[test]
    fn result_constructors_keep_invariants() {
        let op = MoveOperation::new("/a", "/b", hash(), 1).unwrap();
        let ok = MoveResult::moved(op.clone(), "/b".into(), Duration::from_millis(5));
        assert!(ok.success && ok.actual_destination.is_some() && ok.error.is_none());

        let failed = MoveResult::failed(Some(op), "boom", Duration::ZERO);
        assert!(!failed.success && failed.error.is_some());
        assert!(!(failed.is_duplicate && failed.is_quarantined));
    }

    #[test]
    fn batch_counts_sum_to_total() {
        let op = MoveOperation::new("/a", "/b", hash(), 1).unwrap();
        let results = vec![
            MoveResult::moved(op.clone(), "/b".into(), Duration::from_millis(10)),
            MoveResult::failed(None, "missing", Duration::from_millis(2)),
            MoveResult::failed(Some(op), "bad", Duration::from_millis(3)),
        ];
        let batch = BatchMoveResult::from_results(Uuid::new_v4(), results, 0, false);
        assert_eq!(
            batch.successful + batch.duplicates + batch.quarantined + batch.failed,
            batch.total_operations
        );
        let expected = batch.average_time_ms * batch.total_operations as f64;
        assert!((expected - batch.total_time_ms).abs() < 1e-9);
    }

    #[test]
    fn empty_batch_has_zero_average() {
        let batch = BatchMoveResult::from_results(Uuid::new_v4(), Vec::new(), 0, false);
        assert_eq!(batch.total_operations, 0);
        assert_eq!(batch.average_time_ms, 0.0);
    }

    #[test]
    fn parallel_request_needs_two_workers() {
        assert!(BatchMoveRequest::parallel(Vec::new(), 1).validate().is_err());
        assert!(BatchMoveRequest::parallel(Vec::new(), 2).validate().is_ok());
        assert!(BatchMoveRequest::sequential(Vec::new()).validate().is_ok());
    }
}
