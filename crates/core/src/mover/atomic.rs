use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::{MoveError, MoveStage};
use crate::hash::IntegrityVerifier;
use crate::models::MoveOperation;
use crate::mover::fsops::{relocate, RelocateFn, Relocation};

pub const MAX_COMPONENT_BYTES: usize = 255;
pub const MAX_PATH_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    RestoredToSource,
    /// Something else now lives at the source path; the file was left at
    /// the destination.
    SourceReoccupied,
    Failed(String),
}

impl RollbackOutcome {
    pub fn restored(&self) -> bool {
        matches!(self, RollbackOutcome::RestoredToSource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampOutcome {
    Restored,
    NotRestored(String),
}

#[derive(Debug)]
pub struct MoveSuccess {
    pub actual_destination: PathBuf,
    pub relocation: Relocation,
    pub timestamps: TimestampOutcome,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct MoveFailure {
    pub error: MoveError,
    /// Set only when the file was moved and then failed verification.
    pub rollback: Option<RollbackOutcome>,
    /// Where the file is after the failure, when it still exists.
    pub file_location: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Moves one file and proves the bytes arrived intact.
#[derive(Clone, Copy)]
pub struct AtomicMover {
    verifier: IntegrityVerifier,
    relocate: RelocateFn,
}

impl Default for AtomicMover {
    fn default() -> Self {
        Self {
            verifier: IntegrityVerifier::new(),
            relocate,
        }
    }
}

impl fmt::Debug for AtomicMover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicMover").finish_non_exhaustive()
    }
}

impl AtomicMover {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn with_relocator(relocate: RelocateFn) -> Self {
        Self {
            relocate,
            ..Self::default()
        }
    }

    pub fn execute_move(&self, op: &mut MoveOperation) -> Result<MoveSuccess, MoveFailure> {
        let started = Instant::now();
        op.start();
        let src = op.source_path.clone();
        let dst = op.destination_path.clone();

        let fail = |op: &mut MoveOperation, error: MoveError, location: Option<PathBuf>| {
            op.fail(error.to_string());
            MoveFailure {
                error,
                rollback: None,
                file_location: location,
                elapsed: started.elapsed(),
            }
        };

        let src_md = match fs::metadata(&src) {
            Ok(md) if md.is_file() => md,
            _ => return Err(fail(op, MoveError::SourceMissing(src.clone()), None)),
        };
        let mtime = FileTime::from_last_modification_time(&src_md);
        let atime = FileTime::from_last_access_time(&src_md);

        if let Err(e) = validate_destination(&dst) {
            return Err(fail(op, e, Some(src)));
        }
        if fs::symlink_metadata(&dst).is_ok() {
            return Err(fail(op, MoveError::DestinationExists(dst.clone()), Some(src)));
        }
        if let Some(parent) = dst.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                let err = MoveError::io(MoveStage::CreateParent, parent, e);
                return Err(fail(op, err, Some(src)));
            }
        }

        let relocation = match (self.relocate)(&src, &dst) {
            Ok(r) => r,
            Err(e) => {
                let location = [&src, &dst].into_iter().find(|p| p.is_file()).cloned();
                return Err(fail(op, e, location));
            }
        };
        debug!(src = %src.display(), dst = %dst.display(), ?relocation, "file relocated");

        op.begin_verify();
        if let Err(e) = self.verify_destination(&dst, &op.file_hash, op.file_size) {
            let rollback = if relocation.source_retained() {
                discard_copy(&dst)
            } else {
                self.rollback(&src, &dst)
            };
            let location = if rollback.restored() { src.clone() } else { dst.clone() };
            let message = e.to_string();
            if rollback.restored() {
                op.mark_rolled_back(message);
            } else {
                op.rollback_attempted = true;
                op.fail(message);
            }
            return Err(MoveFailure {
                error: e,
                rollback: Some(rollback),
                file_location: Some(location),
                elapsed: started.elapsed(),
            });
        }

        let timestamps = match filetime::set_file_times(&dst, atime, mtime) {
            Ok(()) => TimestampOutcome::Restored,
            Err(e) => {
                warn!(path = %dst.display(), error = %e, "could not restore file timestamps");
                TimestampOutcome::NotRestored(e.to_string())
            }
        };

        op.complete();
        Ok(MoveSuccess {
            actual_destination: dst,
            relocation,
            timestamps,
            elapsed: started.elapsed(),
        })
    }

    /// Puts `destination` back at `source` unless the source path has been
    /// taken in the meantime.
    pub fn rollback(&self, source: &Path, destination: &Path) -> RollbackOutcome {
        if fs::symlink_metadata(source).is_ok() {
            warn!(
                source = %source.display(),
                destination = %destination.display(),
                "rollback skipped, source path is occupied"
            );
            return RollbackOutcome::SourceReoccupied;
        }
        if let Some(parent) = source.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "rollback failed");
                return RollbackOutcome::Failed(e.to_string());
            }
        }
        match relocate(destination, source) {
            Ok(_) => {
                debug!(source = %source.display(), "rolled back");
                RollbackOutcome::RestoredToSource
            }
            Err(e) => {
                warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %e,
                    "rollback failed"
                );
                RollbackOutcome::Failed(e.to_string())
            }
        }
    }

    fn verify_destination(
        &self,
        dst: &Path,
        expected_hash: &str,
        expected_size: u64,
    ) -> Result<(), MoveError> {
        let actual_size = fs::metadata(dst)
            .map_err(|e| MoveError::io(MoveStage::Verify, dst, e))?
            .len();
        if actual_size != expected_size {
            return Err(MoveError::SizeMismatch {
                path: dst.to_path_buf(),
                expected: expected_size,
                actual: actual_size,
            });
        }
        self.verifier.verify(dst, expected_hash)
    }
}

// The source was never removed, so dropping the bad copy restores it.
fn discard_copy(destination: &Path) -> RollbackOutcome {
    match fs::remove_file(destination) {
        Ok(()) => RollbackOutcome::RestoredToSource,
        Err(e) => {
            warn!(path = %destination.display(), error = %e, "could not discard unverified copy");
            RollbackOutcome::Failed(e.to_string())
        }
    }
}

/// Rejects names the target filesystem would refuse or mangle.
pub fn validate_destination(path: &Path) -> Result<(), MoveError> {
    if path.as_os_str().len() > MAX_PATH_BYTES {
        return Err(MoveError::PathTooLong(path.to_path_buf()));
    }
    for component in path.components() {
        if let Component::Normal(name) = component {
            if name.len() > MAX_COMPONENT_BYTES {
                return Err(MoveError::PathTooLong(path.to_path_buf()));
            }
            if name.to_string_lossy().chars().any(char::is_control) {
                return Err(MoveError::InvalidCharacters(path.to_path_buf()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_file;

    fn op_for(src: &Path, dst: &Path) -> MoveOperation {
        let hash = sha256_file(src).unwrap();
        let size = fs::metadata(src).unwrap().len();
        MoveOperation::new(src, dst, hash, size).unwrap()
    }

    #[test]
    fn moves_and_keeps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"0123456789").unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();
        let dst = dir.path().join("nested/deeper/a.txt");

        let mut op = op_for(&src, &dst);
        let ok = AtomicMover::new().execute_move(&mut op).unwrap();
        assert_eq!(ok.actual_destination, dst);
        assert_eq!(ok.timestamps, TimestampOutcome::Restored);
        assert!(!src.exists());
        let md = fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&md), old);
        assert_eq!(op.status, crate::models::MoveStatus::Completed);
    }

    #[test]
    fn existing_destination_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"a").unwrap();
        fs::write(&dst, b"b").unwrap();
        let mut op = op_for(&src, &dst);
        let err = AtomicMover::new().execute_move(&mut op).unwrap_err();
        assert!(matches!(err.error, MoveError::DestinationExists(_)));
        assert_eq!(err.file_location.as_deref(), Some(src.as_path()));
        assert_eq!(fs::read(&dst).unwrap(), b"b");
    }

    #[test]
    fn checksum_mismatch_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"payload").unwrap();
        let dst = dir.path().join("out/a");
        let mut op = MoveOperation::new(&src, &dst, "0".repeat(64), 7).unwrap();

        let err = AtomicMover::new().execute_move(&mut op).unwrap_err();
        assert!(matches!(err.error, MoveError::ChecksumMismatch { .. }));
        assert_eq!(err.rollback, Some(RollbackOutcome::RestoredToSource));
        assert!(src.exists());
        assert!(!dst.exists());
        assert!(op.rollback_attempted && op.rollback_success);
        assert_eq!(op.status, crate::models::MoveStatus::RolledBack);
    }

    fn copy_keeping_source(src: &Path, dst: &Path) -> Result<Relocation, MoveError> {
        crate::mover::fsops::copy_durable(src, dst)?;
        Ok(Relocation::CopiedSourceRetained)
    }

    #[test]
    fn retained_source_still_completes_the_move() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"0123456789").unwrap();
        let dst = dir.path().join("out/a");
        let mut op = op_for(&src, &dst);

        let ok = AtomicMover::with_relocator(copy_keeping_source)
            .execute_move(&mut op)
            .unwrap();
        assert_eq!(ok.relocation, Relocation::CopiedSourceRetained);
        assert_eq!(ok.actual_destination, dst);
        assert_eq!(fs::read(&dst).unwrap(), b"0123456789");
        assert!(src.exists());
        assert_eq!(op.status, crate::models::MoveStatus::Completed);
    }

    #[test]
    fn unverified_copy_is_discarded_when_source_was_kept() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"payload").unwrap();
        let dst = dir.path().join("out/a");
        let mut op = MoveOperation::new(&src, &dst, "0".repeat(64), 7).unwrap();

        let err = AtomicMover::with_relocator(copy_keeping_source)
            .execute_move(&mut op)
            .unwrap_err();
        assert_eq!(err.rollback, Some(RollbackOutcome::RestoredToSource));
        assert_eq!(err.file_location.as_deref(), Some(src.as_path()));
        assert!(!dst.exists());
        assert!(src.exists());
    }

    #[test]
    fn size_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"payload").unwrap();
        let hash = sha256_file(&src).unwrap();
        let mut op = MoveOperation::new(&src, dir.path().join("b"), hash, 99).unwrap();
        let err = AtomicMover::new().execute_move(&mut op).unwrap_err();
        assert!(matches!(err.error, MoveError::SizeMismatch { expected: 99, actual: 7, .. }));
        assert!(src.exists());
    }

    #[test]
    fn rollback_refuses_reoccupied_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"new occupant").unwrap();
        fs::write(&dst, b"moved").unwrap();
        let outcome = AtomicMover::new().rollback(&src, &dst);
        assert_eq!(outcome, RollbackOutcome::SourceReoccupied);
        assert_eq!(fs::read(&dst).unwrap(), b"moved");
        assert_eq!(fs::read(&src).unwrap(), b"new occupant");
    }

    #[test]
    fn destination_names_are_validated() {
        let long = format!("/tmp/{}", "x".repeat(300));
        assert!(matches!(
            validate_destination(Path::new(&long)),
            Err(MoveError::PathTooLong(_))
        ));
        assert!(matches!(
            validate_destination(Path::new("/tmp/bad\u{7}name")),
            Err(MoveError::InvalidCharacters(_))
        ));
        assert!(validate_destination(Path::new("/tmp/ok name.jpg")).is_ok());
    }

    #[test]
    fn missing_source_fails_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("gone");
        let dst = dir.path().join("sub/out");
        let mut op = MoveOperation::new(&src, &dst, "a".repeat(64), 1).unwrap();
        let err = AtomicMover::new().execute_move(&mut op).unwrap_err();
        assert!(matches!(err.error, MoveError::SourceMissing(_)));
        assert!(!dir.path().join("sub").exists());
    }
}
