use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

/// Target paths currently claimed by in-flight writers.
///
/// Shared by the quarantine and duplicate trees so that two writers that
/// compute the same target fall back to a suffix instead of clobbering each
/// other. Construct one per vault and pass it around behind an `Arc`.
#[derive(Debug, Default)]
pub struct PathReservations {
    claimed: Mutex<HashSet<PathBuf>>,
}

/// A claimed path; released when dropped.
#[derive(Debug)]
pub struct Reservation<'a> {
    owner: &'a PathReservations,
    path: PathBuf,
}

impl Reservation<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.owner
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}

impl PathReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `dir/file_name`, or the first free `stem_<HHMMSS>[_n].ext`
    /// variant when that name is taken on disk or by another writer.
    pub fn reserve(&self, dir: &Path, file_name: &str) -> Reservation<'_> {
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let first = dir.join(file_name);
        let path = if is_free(&claimed, &first) {
            first
        } else {
            let (stem, ext) = split_extension(file_name);
            let stamp = Local::now().format("%H%M%S").to_string();
            let mut counter = 0u32;
            loop {
                let candidate_name = if counter == 0 {
                    format!("{stem}_{stamp}{ext}")
                } else {
                    format!("{stem}_{stamp}_{counter}{ext}")
                };
                let candidate = dir.join(candidate_name);
                if is_free(&claimed, &candidate) {
                    break candidate;
                }
                counter += 1;
            }
        };

        claimed.insert(path.clone());
        Reservation { owner: self, path }
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(path)
    }
}

fn is_free(claimed: &HashSet<PathBuf>, path: &Path) -> bool {
    !claimed.contains(path) && std::fs::symlink_metadata(path).is_err()
}

/// Splits `name` into stem and `.ext` (empty when there is none).
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}
