use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hash::sha256_file;
use crate::metadata::ConsolidatedMetadata;
use crate::mover::fsops::{copy_durable, relocate};
use crate::quarantine::naming::sanitize_filename;
use crate::quarantine::reason::{classify_error, QuarantineReason, Severity};
use crate::registry::{PathReservations, Reservation};

const SIDECAR_EXT: &str = "json";

/// One failed recovery pass, kept in the sidecar history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub error_type: QuarantineReason,
    pub error_message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub quarantine_id: Uuid,
    /// Where the file is now: inside the quarantine tree, or at the
    /// destination when it was recorded in place.
    pub file_path: PathBuf,
    pub original_path: PathBuf,
    pub intended_destination: PathBuf,
    pub error_type: QuarantineReason,
    pub error_message: String,
    pub quarantined_at: DateTime<Utc>,
    pub recovery_attempts: u32,
    pub can_retry: bool,
    pub severity: Severity,
    pub escalation_level: u32,
    #[serde(default)]
    pub previous_attempts: Vec<RecoveryAttempt>,
    pub file_hash: Option<String>,
    pub file_size: Option<u64>,
    #[serde(default)]
    pub metadata: Option<ConsolidatedMetadata>,
    #[serde(default)]
    pub in_place: bool,
    #[serde(default)]
    pub sidecar_path: PathBuf,
}

impl QuarantineRecord {
    /// Folds a failed retry into the record: the reason is reclassified and
    /// severity climbs one step.
    pub fn record_failed_attempt(&mut self, error: &Error) {
        let reason = classify_error(Some(error));
        self.previous_attempts.push(RecoveryAttempt {
            attempted_at: Utc::now(),
            error_type: reason,
            error_message: error.to_string(),
            severity: self.severity,
        });
        self.recovery_attempts += 1;
        self.escalation_level += 1;
        self.severity = self.severity.escalate();
        self.error_type = reason;
        self.error_message = error.to_string();
        self.can_retry = reason.is_retryable();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct QuarantineStats {
    pub total: usize,
    pub retryable: usize,
    pub in_place: usize,
    pub total_bytes: u64,
    pub by_reason: BTreeMap<QuarantineReason, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Owns `<root>/<reason>/` and the JSON sidecars describing each entry.
pub struct QuarantineManager {
    root: PathBuf,
    reservations: Arc<PathReservations>,
}

impl QuarantineManager {
    pub fn new(root: impl Into<PathBuf>, reservations: Arc<PathReservations>) -> Self {
        Self {
            root: root.into(),
            reservations,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn quarantine_file(
        &self,
        current_location: &Path,
        original_path: &Path,
        intended_destination: &Path,
        error: Option<&Error>,
        metadata: Option<&ConsolidatedMetadata>,
    ) -> Result<QuarantineRecord> {
        if !current_location.is_file() {
            return Err(Error::NotFound(current_location.to_path_buf()));
        }
        let reason = classify_error(error);
        let dir = self.reason_dir(reason)?;
        let name = sanitize_filename(&file_name_of(original_path, current_location));
        let slot = self.reserve_with_sidecar(&dir, &name);
        let target = slot.path().to_path_buf();

        match relocate(current_location, &target) {
            Ok(relocation) if relocation.source_retained() => {
                warn!(
                    path = %current_location.display(),
                    quarantined_to = %target.display(),
                    "quarantine copy left the source behind"
                );
            }
            Ok(_) => {}
            Err(move_err) => {
                warn!(
                    path = %current_location.display(),
                    error = %move_err,
                    "quarantine move failed, copying instead"
                );
                if let Err(copy_err) = copy_durable(current_location, &target) {
                    error!(
                        path = %current_location.display(),
                        error = %copy_err,
                        "failed to quarantine file"
                    );
                    return Err(copy_err.into());
                }
            }
        }
        self.finish_quarantine(
            &target,
            original_path,
            intended_destination,
            reason,
            error,
            metadata,
        )
    }

    fn finish_quarantine(
        &self,
        target: &Path,
        original_path: &Path,
        intended_destination: &Path,
        reason: QuarantineReason,
        error: Option<&Error>,
        metadata: Option<&ConsolidatedMetadata>,
    ) -> Result<QuarantineRecord> {
        let mut record = new_record(
            target,
            original_path,
            intended_destination,
            reason,
            error,
            metadata,
        );
        record.sidecar_path = sidecar_for(target);
        self.update_record(&record)?;
        warn!(
            path = %original_path.display(),
            quarantined_to = %target.display(),
            reason = %reason,
            severity = %record.severity,
            "file quarantined"
        );
        Ok(record)
    }

    /// Writes a sidecar for a file that stays at `file_location`.
    pub fn record_in_place(
        &self,
        file_location: &Path,
        original_path: &Path,
        intended_destination: &Path,
        error: Option<&Error>,
        metadata: Option<&ConsolidatedMetadata>,
    ) -> Result<QuarantineRecord> {
        let reason = classify_error(error);
        let dir = self.reason_dir(reason)?;
        let name = sanitize_filename(&file_name_of(original_path, file_location));
        let slot = self.reserve_with_sidecar(&dir, &name);

        let mut record = new_record(
            file_location,
            original_path,
            intended_destination,
            reason,
            error,
            metadata,
        );
        record.in_place = true;
        record.sidecar_path = sidecar_for(slot.path());
        self.update_record(&record)?;
        warn!(
            path = %file_location.display(),
            reason = %reason,
            "file flagged in place"
        );
        Ok(record)
    }

    pub fn list_quarantined_files(
        &self,
        reason: Option<QuarantineReason>,
    ) -> Result<Vec<QuarantineRecord>> {
        let mut records = Vec::new();
        for r in QuarantineReason::ALL {
            let dir = self.root.join(r.as_str());
            let entries = match fs::read_dir(&dir) {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXT) {
                    continue;
                }
                match read_sidecar(&path) {
                    Ok(mut record) => {
                        record.sidecar_path = path;
                        records.push(record);
                    }
                    Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable sidecar"),
                }
            }
        }
        if let Some(wanted) = reason {
            records.retain(|r| r.error_type == wanted);
        }
        records.sort_by_key(|r| r.quarantined_at);
        Ok(records)
    }

    pub fn statistics(&self) -> Result<QuarantineStats> {
        let mut stats = QuarantineStats::default();
        for record in self.list_quarantined_files(None)? {
            stats.total += 1;
            if record.can_retry {
                stats.retryable += 1;
            }
            if record.in_place {
                stats.in_place += 1;
            }
            stats.total_bytes += record.file_size.unwrap_or(0);
            *stats.by_reason.entry(record.error_type).or_insert(0) += 1;
            *stats.by_severity.entry(record.severity).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Rewrites the sidecar at `record.sidecar_path`.
    pub fn update_record(&self, record: &QuarantineRecord) -> Result<()> {
        if record.sidecar_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput(format!(
                "quarantine record {} has no sidecar",
                record.quarantine_id
            )));
        }
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&record.sidecar_path, json)?;
        Ok(())
    }

    /// Drops the sidecar once the file has been recovered.
    pub fn release(&self, record: &QuarantineRecord) -> Result<()> {
        match fs::remove_file(&record.sidecar_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn reason_dir(&self, reason: QuarantineReason) -> Result<PathBuf> {
        let dir = self.root.join(reason.as_str());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    // Both `<name>` and `<name>.json` must be free.
    fn reserve_with_sidecar(&self, dir: &Path, name: &str) -> Reservation<'_> {
        let mut held = Vec::new();
        loop {
            let slot = self.reservations.reserve(dir, name);
            if !sidecar_for(slot.path()).exists() {
                return slot;
            }
            held.push(slot);
        }
    }
}

fn new_record(
    file_path: &Path,
    original_path: &Path,
    intended_destination: &Path,
    reason: QuarantineReason,
    error: Option<&Error>,
    metadata: Option<&ConsolidatedMetadata>,
) -> QuarantineRecord {
    let file_size = fs::metadata(file_path).ok().map(|m| m.len());
    let file_hash = sha256_file(file_path)
        .ok()
        .or_else(|| metadata.map(|m| m.checksum.clone()));
    QuarantineRecord {
        quarantine_id: Uuid::new_v4(),
        file_path: file_path.to_path_buf(),
        original_path: original_path.to_path_buf(),
        intended_destination: intended_destination.to_path_buf(),
        error_type: reason,
        error_message: error.map(|e| e.to_string()).unwrap_or_default(),
        quarantined_at: Utc::now(),
        recovery_attempts: 0,
        can_retry: reason.is_retryable(),
        severity: reason.default_severity(),
        escalation_level: 0,
        previous_attempts: Vec::new(),
        file_hash,
        file_size,
        metadata: metadata.cloned(),
        in_place: false,
        sidecar_path: PathBuf::new(),
    }
}

fn file_name_of(original: &Path, fallback: &Path) -> String {
    original
        .file_name()
        .or_else(|| fallback.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sidecar_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(SIDECAR_EXT);
    PathBuf::from(s)
}

fn read_sidecar(path: &Path) -> Result<QuarantineRecord> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn manager(root: &Path) -> QuarantineManager {
        QuarantineManager::new(root.join("quarantine"), Arc::new(PathReservations::new()))
    }

    #[test]
    fn quarantined_file_moves_under_reason_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"content").unwrap();
        let qm = manager(dir.path());
        let err = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));

        let rec = qm
            .quarantine_file(&src, &src, &dir.path().join("vault/a.txt"), Some(&err), None)
            .unwrap();
        assert!(!src.exists());
        assert_eq!(rec.error_type, QuarantineReason::PermissionError);
        assert_eq!(rec.severity, Severity::Critical);
        assert!(rec.can_retry);
        assert_eq!(rec.file_size, Some(7));
        assert_eq!(
            rec.file_path,
            dir.path().join("quarantine/permission_error/a.txt")
        );
        let sidecar = dir.path().join("quarantine/permission_error/a.txt.json");
        let json = fs::read_to_string(&sidecar).unwrap();
        assert!(json.contains("\"error_type\": \"permission_error\""));
    }

    #[test]
    fn same_name_collisions_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let qm = manager(dir.path());
        let mut paths = Vec::new();
        for i in 0..2 {
            let sub = dir.path().join(format!("src{i}"));
            fs::create_dir_all(&sub).unwrap();
            let src = sub.join("photo.jpg");
            fs::write(&src, format!("v{i}")).unwrap();
            let rec = qm
                .quarantine_file(&src, &src, Path::new("/dest/photo.jpg"), None, None)
                .unwrap();
            paths.push(rec.file_path);
        }
        assert_ne!(paths[0], paths[1]);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn in_place_record_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("vault/a.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"x").unwrap();
        let qm = manager(dir.path());
        let rec = qm
            .record_in_place(&dest, Path::new("/in/a.txt"), &dest, None, None)
            .unwrap();
        assert!(dest.exists());
        assert!(rec.in_place);
        assert_eq!(rec.file_path, dest);
        assert!(rec.sidecar_path.exists());
        assert_eq!(qm.list_quarantined_files(None).unwrap().len(), 1);
    }

    #[test]
    fn listing_filters_sorts_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let qm = manager(dir.path());
        for (name, kind) in [("a", io::ErrorKind::PermissionDenied), ("b", io::ErrorKind::TimedOut)] {
            let src = dir.path().join(name);
            fs::write(&src, name).unwrap();
            let err = Error::Io(io::Error::new(kind, "x"));
            qm.quarantine_file(&src, &src, Path::new("/d"), Some(&err), None)
                .unwrap();
        }
        fs::write(qm.root().join("network_error/broken.json"), b"{not json").unwrap();

        let all = qm.list_quarantined_files(None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].quarantined_at <= all[1].quarantined_at);
        let net = qm
            .list_quarantined_files(Some(QuarantineReason::NetworkError))
            .unwrap();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].severity, Severity::Info);

        let stats = qm.statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.retryable, 2);
        assert_eq!(stats.by_reason[&QuarantineReason::PermissionError], 1);
    }

    #[test]
    fn failed_attempt_escalates_one_step() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"a").unwrap();
        let qm = manager(dir.path());
        let err = Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let mut rec = qm
            .quarantine_file(&src, &src, Path::new("/d"), Some(&err), None)
            .unwrap();
        assert_eq!(rec.severity, Severity::Info);

        rec.record_failed_attempt(&err);
        assert_eq!(rec.severity, Severity::Warning);
        assert_eq!(rec.recovery_attempts, 1);
        assert_eq!(rec.escalation_level, 1);
        assert_eq!(rec.previous_attempts.len(), 1);

        let denied = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        rec.record_failed_attempt(&denied);
        assert_eq!(rec.severity, Severity::Error);
        assert_eq!(rec.error_type, QuarantineReason::PermissionError);

        qm.update_record(&rec).unwrap();
        let back = qm.list_quarantined_files(None).unwrap();
        assert_eq!(back[0].recovery_attempts, 2);

        qm.release(&rec).unwrap();
        assert!(qm.list_quarantined_files(None).unwrap().is_empty());
    }
}
