use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::db::FileIndex;
use crate::error::{Error, Result};
use crate::hash::sha256_file;
use crate::models::{DuplicateGroup, FileRecord, FileStatus, IngestStats};

/// OS and tool artifacts that never enter the vault.
const IGNORED_NAMES: &[&str] = &[
    "thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    "icon\r",
    "$recycle.bin",
    "system volume information",
    "__macosx",
];

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct IngestProgress<'a> {
    pub stats: &'a IngestStats,
    pub current_path: &'a Path,
}

pub struct FileIngestor {
    index: Arc<FileIndex>,
    totals: Mutex<IngestStats>,
}

impl FileIngestor {
    pub fn new(index: Arc<FileIndex>) -> Self {
        Self {
            index,
            totals: Mutex::new(IngestStats::default()),
        }
    }

    pub fn index(&self) -> &Arc<FileIndex> {
        &self.index
    }

    pub fn ingest_file(&self, path: &Path) -> Result<FileRecord> {
        let started = Instant::now();
        let record = self.ingest_one(path)?;

        let mut single = IngestStats {
            files_seen: 1,
            files_ingested: 1,
            bytes_processed: record.file_size,
            elapsed: started.elapsed(),
            ..IngestStats::default()
        };
        if record.status == FileStatus::Duplicate {
            single.duplicates_found = 1;
        }
        self.accumulate(&single);
        Ok(record)
    }

    fn ingest_one(&self, path: &Path) -> Result<FileRecord> {
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

        let abs = absolutize(path)?;
        let checksum = sha256_file(&abs)?;
        let modified_at = md.modified().ok().map(DateTime::<Utc>::from);
        let admission = self
            .index
            .admit_file(&abs, &checksum, md.len(), modified_at)?;

        match &admission.original_path {
            Some(original) => debug!(
                path = %abs.display(),
                original = %original.display(),
                checksum = %checksum,
                "duplicate content ingested"
            ),
            None => debug!(path = %abs.display(), checksum = %checksum, "file ingested"),
        }
        Ok(admission.record)
    }

    pub fn ingest_directory(&self, root: &Path, recursive: bool) -> Result<IngestStats> {
        self.ingest_directory_with_progress(root, recursive, None, |_| {})
    }

    pub fn ingest_directory_with_progress<F>(
        &self,
        root: &Path,
        recursive: bool,
        cancel: Option<&CancelToken>,
        mut on_progress: F,
    ) -> Result<IngestStats>
    where
        F: FnMut(&IngestProgress<'_>),
    {
        if !root.exists() {
            return Err(Error::NotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let started = Instant::now();
        let mut stats = IngestStats::default();
        let mut walker = WalkDir::new(root).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut skipped = 0u64;
        let entries = walker.into_iter().filter_entry(|e| {
            if e.depth() == 0 || !is_ignored(e) {
                return true;
            }
            skipped += pruned_file_count(e, recursive);
            false
        });
        for entry in entries {
            if let Some(cancel) = cancel {
                if cancel.is_cancelled() {
                    stats.interrupted = true;
                    break;
                }
            }

            let entry = match entry {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    stats.errors += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            stats.files_seen += 1;
            match self.ingest_one(entry.path()) {
                Ok(record) => {
                    stats.files_ingested += 1;
                    stats.bytes_processed = stats.bytes_processed.saturating_add(record.file_size);
                    if record.status == FileStatus::Duplicate {
                        stats.duplicates_found += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to ingest file");
                    stats.errors += 1;
                }
            }

            stats.elapsed = started.elapsed();
            on_progress(&IngestProgress {
                stats: &stats,
                current_path: entry.path(),
            });
        }

        stats.elapsed = started.elapsed();
        stats.files_skipped = skipped;
        self.accumulate(&stats);

        info!(
            root = %root.display(),
            seen = stats.files_seen,
            ingested = stats.files_ingested,
            duplicates = stats.duplicates_found,
            errors = stats.errors,
            skipped = stats.files_skipped,
            bytes = stats.bytes_processed,
            "directory ingestion finished in {:.2}s",
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }

    pub fn is_duplicate(&self, checksum: &str) -> Result<bool> {
        if checksum.trim().is_empty() {
            return Err(Error::InvalidInput("checksum must not be empty".to_string()));
        }
        self.index.checksum_exists(checksum)
    }

    pub fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>> {
        self.index.duplicate_groups()
    }

    /// Running totals across every ingestion this instance performed.
    pub fn stats(&self) -> IngestStats {
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn accumulate(&self, stats: &IngestStats) {
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .merge(stats);
    }
}

/// Dotfiles, OS metadata names and `*.tmp` are filtered out of ingestion.
pub fn is_ignored_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with('.') || lower.ends_with(".tmp") || IGNORED_NAMES.contains(&lower.as_str())
}

/// Regular files under `root` that ingestion would consider, sorted.
pub fn collect_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::NotFound(root.to_path_buf()));
    }
    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(is_ignored_name)
        .unwrap_or(false)
}

// Files hidden by pruning an ignored entry.
fn pruned_file_count(entry: &DirEntry, recursive: bool) -> u64 {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return 1;
    }
    if !recursive || !file_type.is_dir() {
        return 0;
    }
    WalkDir::new(entry.path())
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count() as u64
}
