use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{ClaimOutcome, FileIndex};
use crate::drive::{nearest_existing_ancestor, space_for_path};
use crate::error::{Error, MoveError, Result};
use crate::hash::IntegrityVerifier;
use crate::ingest::CancelToken;
use crate::metadata::ConsolidatedMetadata;
use crate::models::{
    BatchMoveItem, BatchMoveRequest, BatchMoveResult, FileStatus, MoveOperation, MovePreview,
    MoveResult,
};
use crate::mover::atomic::{
    validate_destination, AtomicMover, MoveFailure, MoveSuccess, TimestampOutcome,
};
use crate::mover::duplicates::{DuplicateHandler, IndexedDuplicateHandler};
use crate::quarantine::{QuarantineManager, QuarantineRecord};
use crate::registry::PathReservations;

pub const DEFAULT_SPACE_SAFETY_MARGIN: f64 = 0.10;

/// Places files into the vault: duplicate detection, verified moves,
/// quarantine on failure.
pub struct FileMover {
    index: Arc<FileIndex>,
    duplicates: Arc<dyn DuplicateHandler>,
    quarantine: QuarantineManager,
    mover: AtomicMover,
    verifier: IntegrityVerifier,
    space_safety_margin: f64,
}

impl FileMover {
    pub fn new(
        index: Arc<FileIndex>,
        duplicates: Arc<dyn DuplicateHandler>,
        quarantine: QuarantineManager,
    ) -> Self {
        Self {
            index,
            duplicates,
            quarantine,
            mover: AtomicMover::new(),
            verifier: IntegrityVerifier::new(),
            space_safety_margin: DEFAULT_SPACE_SAFETY_MARGIN,
        }
    }

    /// Wires the index-backed duplicate handler and a quarantine manager
    /// that share one reservation registry.
    pub fn for_vault(
        index: Arc<FileIndex>,
        quarantine_root: impl Into<PathBuf>,
        duplicates_root: impl Into<PathBuf>,
    ) -> Self {
        let reservations = Arc::new(PathReservations::new());
        let duplicates = Arc::new(IndexedDuplicateHandler::new(
            index.clone(),
            duplicates_root,
            reservations.clone(),
        ));
        let quarantine = QuarantineManager::new(quarantine_root, reservations);
        Self::new(index, duplicates, quarantine)
    }

    pub fn with_space_safety_margin(mut self, margin: f64) -> Self {
        self.space_safety_margin = margin.max(0.0);
        self
    }

    pub fn index(&self) -> &Arc<FileIndex> {
        &self.index
    }

    pub fn quarantine(&self) -> &QuarantineManager {
        &self.quarantine
    }

    /// Moves one file. Only input errors (missing source, source equal to
    /// destination) come back as `Err`; every later failure is reported in
    /// the returned [`MoveResult`].
    pub fn move_file(
        &self,
        source: &Path,
        destination: &Path,
        metadata: Option<&ConsolidatedMetadata>,
    ) -> Result<MoveResult> {
        let result = self.move_one(source, destination, metadata)?;
        if let Some(op) = &result.operation {
            if let Err(e) = self.index.record_move_operation(op, None) {
                warn!(operation = %op.operation_id, error = %e, "failed to persist move operation");
            }
        }
        Ok(result)
    }

    fn move_one(
        &self,
        source: &Path,
        destination: &Path,
        metadata: Option<&ConsolidatedMetadata>,
    ) -> Result<MoveResult> {
        let started = Instant::now();
        let md = match fs::metadata(source) {
            Ok(md) => md,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(source.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !md.is_file() {
            return Err(Error::InvalidInput(format!(
                "not a regular file: {}",
                source.display()
            )));
        }
        if source == destination {
            return Err(Error::InvalidInput(format!(
                "source and destination are the same path: {}",
                source.display()
            )));
        }

        let checksum = self.verifier.compute_hash(source)?;
        let mut op = MoveOperation::new(source, destination, checksum.clone(), md.len())?;
        debug!(path = %source.display(), checksum = %checksum, "move requested");

        let claim = match self
            .duplicates
            .claim(source, destination, &checksum, md.len())?
        {
            ClaimOutcome::Claimed(claim) => claim,
            ClaimOutcome::Owned(original) => {
                op.start();
                return Ok(match self.duplicates.handle_duplicate(source, &original, &checksum) {
                    Ok(record) => {
                        op.complete();
                        MoveResult::duplicate(op, record, started.elapsed())
                    }
                    Err(e) => {
                        op.fail(e.to_string());
                        let location = source.is_file().then(|| source.to_path_buf());
                        self.quarantine_after_failure(op, e, location, false, metadata, started)
                    }
                });
            }
        };

        match self.mover.execute_move(&mut op) {
            Ok(done) => {
                let mut warnings = placement_warnings(&done);
                if let Err(e) = self.duplicates.register_placement(
                    source,
                    &done.actual_destination,
                    &checksum,
                    md.len(),
                ) {
                    warn!(
                        path = %done.actual_destination.display(),
                        error = %e,
                        "index update failed after move"
                    );
                    warnings.push(format!("index not updated: {e}"));
                }
                info!(
                    src = %source.display(),
                    dst = %done.actual_destination.display(),
                    bytes = md.len(),
                    "file moved"
                );
                Ok(MoveResult::moved(op, done.actual_destination, started.elapsed())
                    .with_warnings(warnings))
            }
            Err(failure) => {
                if let Err(e) = self.duplicates.release_claim(&claim) {
                    warn!(path = %destination.display(), error = %e, "could not release content claim");
                }
                Ok(self.handle_move_failure(op, failure, metadata, started))
            }
        }
    }

    fn handle_move_failure(
        &self,
        op: MoveOperation,
        failure: MoveFailure,
        metadata: Option<&ConsolidatedMetadata>,
        started: Instant,
    ) -> MoveResult {
        let in_place = failure.rollback.as_ref().is_some_and(|r| !r.restored());
        let location = failure.file_location;
        self.quarantine_after_failure(
            op,
            Error::Move(failure.error),
            location,
            in_place,
            metadata,
            started,
        )
    }

    fn quarantine_after_failure(
        &self,
        mut op: MoveOperation,
        error: Error,
        location: Option<PathBuf>,
        in_place: bool,
        metadata: Option<&ConsolidatedMetadata>,
        started: Instant,
    ) -> MoveResult {
        let message = error.to_string();
        let Some(location) = location else {
            warn!(
                path = %op.source_path.display(),
                error = %message,
                "move failed, file not found afterwards"
            );
            return MoveResult::failed(Some(op), message, started.elapsed());
        };

        let quarantined = if in_place {
            self.quarantine.record_in_place(
                &location,
                &op.source_path,
                &op.destination_path,
                Some(&error),
                metadata,
            )
        } else {
            self.quarantine.quarantine_file(
                &location,
                &op.source_path,
                &op.destination_path,
                Some(&error),
                metadata,
            )
        };

        match quarantined {
            Ok(record) => {
                if let Err(e) = self.index.set_status(&op.source_path, FileStatus::Error) {
                    debug!(path = %op.source_path.display(), error = %e, "could not flag index row");
                }
                op.mark_quarantined();
                MoveResult::quarantined(op, record, message, started.elapsed())
            }
            Err(qe) => {
                error!(
                    path = %location.display(),
                    error = %message,
                    quarantine_error = %qe,
                    "move failed and file could not be quarantined"
                );
                MoveResult::failed(
                    Some(op),
                    format!("{message}; quarantine failed: {qe}"),
                    started.elapsed(),
                )
            }
        }
    }

    pub fn move_batch(
        &self,
        request: BatchMoveRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<BatchMoveResult> {
        request.validate()?;
        if request.verify_space {
            self.check_space(&request.operations)?;
        }

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = request.operations.len();
        let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
        info!(batch = %batch_id, operations = total, parallel = request.parallel, "batch started");

        let results: Vec<MoveResult> = if request.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(request.max_workers)
                .build()
                .map_err(|e| Error::InvalidInput(format!("cannot build worker pool: {e}")))?;
            let stop = AtomicBool::new(false);
            let slots: Vec<Option<MoveResult>> = pool.install(|| {
                request
                    .operations
                    .par_iter()
                    .map(|item| {
                        if stop.load(Ordering::SeqCst) || cancelled() {
                            return None;
                        }
                        let result = self.run_item(item);
                        if request.stop_on_first_error && is_failure(&result) {
                            stop.store(true, Ordering::SeqCst);
                        }
                        Some(result)
                    })
                    .collect()
            });
            slots.into_iter().flatten().collect()
        } else {
            let mut results = Vec::with_capacity(total);
            for item in &request.operations {
                if cancelled() {
                    break;
                }
                let result = self.run_item(item);
                let failed = is_failure(&result);
                results.push(result);
                if request.stop_on_first_error && failed {
                    break;
                }
            }
            results
        };

        let not_attempted = total - results.len();
        let interrupted = cancelled() && not_attempted > 0;
        for op in results.iter().filter_map(|r| r.operation.as_ref()) {
            if let Err(e) = self.index.record_move_operation(op, Some(batch_id)) {
                warn!(operation = %op.operation_id, error = %e, "failed to persist move operation");
            }
        }

        let summary = BatchMoveResult::from_results(batch_id, results, not_attempted, interrupted);
        if let Err(e) = self.index.record_batch(&summary, started_at) {
            warn!(batch = %batch_id, error = %e, "failed to persist batch summary");
        }
        if let Err(e) = self.index.checkpoint() {
            warn!(error = %e, "index checkpoint failed");
        }

        info!(
            batch = %batch_id,
            successful = summary.successful,
            duplicates = summary.duplicates,
            quarantined = summary.quarantined,
            failed = summary.failed,
            not_attempted = summary.not_attempted,
            interrupted = summary.interrupted,
            "batch finished"
        );
        Ok(summary)
    }

    fn run_item(&self, item: &BatchMoveItem) -> MoveResult {
        let started = Instant::now();
        match self.move_one(&item.source, &item.destination, item.metadata.as_ref()) {
            Ok(result) => result,
            Err(e) => {
                warn!(path = %item.source.display(), error = %e, "batch item rejected");
                MoveResult::failed(None, e.to_string(), started.elapsed())
            }
        }
    }

    /// Fails when any target filesystem lacks room for its share of the batch
    /// plus the safety margin.
    fn check_space(&self, items: &[BatchMoveItem]) -> Result<()> {
        let mut required: HashMap<PathBuf, (u64, u64)> = HashMap::new();
        for item in items {
            let size = fs::metadata(&item.source).map(|m| m.len()).unwrap_or(0);
            let Some(space) = space_for_path(&item.destination) else {
                debug!(
                    path = %item.destination.display(),
                    "no disk found for destination, skipping space check"
                );
                continue;
            };
            let entry = required
                .entry(space.mount_point)
                .or_insert((0, space.available_bytes));
            entry.0 = entry.0.saturating_add(size);
        }

        for (mount, (bytes, available)) in required {
            let needed = (bytes as f64 * (1.0 + self.space_safety_margin)).ceil() as u64;
            if needed > available {
                return Err(MoveError::InsufficientSpace {
                    mount,
                    required: needed,
                    available,
                }
                .into());
            }
        }
        Ok(())
    }

    /// What `move_file` would do, without touching the filesystem or index.
    pub fn preview_move(&self, source: &Path, destination: &Path) -> Result<MovePreview> {
        let mut warnings = Vec::new();
        let source_md = fs::metadata(source).ok().filter(|m| m.is_file());
        let source_exists = source_md.is_some();
        let file_size = source_md.as_ref().map(|m| m.len());

        let mut file_hash = None;
        let mut duplicate_of = None;
        let mut likely_duplicate = false;
        if source_exists {
            let hash = self.verifier.compute_hash(source)?;
            if let Some(original) = self.duplicates.find_original(source, &hash)? {
                likely_duplicate = true;
                duplicate_of = Some(original.file_path);
            } else if self.duplicates.is_known(&hash)? {
                debug!(path = %source.display(), "content known to the index but not on disk");
            }
            file_hash = Some(hash);
        } else {
            warnings.push(format!("source does not exist: {}", source.display()));
        }

        let destination_exists = fs::symlink_metadata(destination).is_ok();
        if destination_exists && !likely_duplicate {
            warnings.push(format!("destination already exists: {}", destination.display()));
        }
        let destination_writable = destination
            .parent()
            .and_then(nearest_existing_ancestor)
            .and_then(|p| fs::metadata(p).ok())
            .is_some_and(|m| m.is_dir() && !m.permissions().readonly());
        if !destination_writable {
            warnings.push(format!("destination is not writable: {}", destination.display()));
        }
        let name_ok = match validate_destination(destination) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(e.to_string());
                false
            }
        };
        if source == destination {
            warnings.push("source and destination are the same path".to_string());
        }

        let would_succeed = source_exists
            && source != destination
            && (likely_duplicate || (!destination_exists && destination_writable && name_ok));

        Ok(MovePreview {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            source_exists,
            file_size,
            file_hash,
            likely_duplicate,
            duplicate_of,
            destination_exists,
            destination_writable,
            would_succeed,
            warnings,
        })
    }

    /// Resubmits a quarantined file to its intended destination.
    pub fn retry_quarantined(&self, record: &QuarantineRecord) -> Result<MoveResult> {
        if !record.can_retry {
            return Err(Error::InvalidInput(format!(
                "quarantined file is not retryable ({}): {}",
                record.error_type,
                record.file_path.display()
            )));
        }
        let started = Instant::now();
        let md = match fs::metadata(&record.file_path) {
            Ok(md) if md.is_file() => md,
            _ => return Err(Error::NotFound(record.file_path.clone())),
        };
        let checksum = self.verifier.compute_hash(&record.file_path)?;
        let mut op = MoveOperation::new(
            &record.file_path,
            &record.intended_destination,
            checksum.clone(),
            md.len(),
        )?;

        let result = match self.mover.execute_move(&mut op) {
            Ok(done) => {
                self.quarantine.release(record)?;
                let mut warnings = placement_warnings(&done);
                if let Err(e) = self.duplicates.register_placement(
                    &record.original_path,
                    &done.actual_destination,
                    &checksum,
                    md.len(),
                ) {
                    warnings.push(format!("index not updated: {e}"));
                }
                info!(
                    path = %record.original_path.display(),
                    dst = %done.actual_destination.display(),
                    attempts = record.recovery_attempts + 1,
                    "quarantined file recovered"
                );
                MoveResult::moved(op, done.actual_destination, started.elapsed())
                    .with_warnings(warnings)
            }
            Err(failure) => {
                let message = failure.error.to_string();
                let mut updated = record.clone();
                if let Some(location) = &failure.file_location {
                    if location != &record.file_path {
                        updated.file_path = location.clone();
                        updated.in_place = true;
                    }
                }
                updated.record_failed_attempt(&Error::Move(failure.error));
                self.quarantine.update_record(&updated)?;
                warn!(
                    path = %record.file_path.display(),
                    attempts = updated.recovery_attempts,
                    severity = %updated.severity,
                    error = %message,
                    "retry failed"
                );
                op.mark_quarantined();
                MoveResult::quarantined(op, updated, message, started.elapsed())
            }
        };

        if let Some(op) = &result.operation {
            if let Err(e) = self.index.record_move_operation(op, None) {
                warn!(operation = %op.operation_id, error = %e, "failed to persist move operation");
            }
        }
        Ok(result)
    }
}

fn placement_warnings(done: &MoveSuccess) -> Vec<String> {
    let mut warnings = Vec::new();
    if let TimestampOutcome::NotRestored(reason) = &done.timestamps {
        warnings.push(format!("timestamps not restored: {reason}"));
    }
    if done.relocation.source_retained() {
        warnings.push("source left in place after copy".to_string());
    }
    warnings
}

fn is_failure(result: &MoveResult) -> bool {
    !result.success
}
