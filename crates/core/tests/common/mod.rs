#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vault_core::db::FileIndex;
use vault_core::{FileIngestor, FileMover};

/// A throwaway vault: `<tmp>/vault` with its index, quarantine and duplicate
/// trees, plus an `inbox` for incoming files.
pub struct Fixture {
    pub dir: TempDir,
    pub index: Arc<FileIndex>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(FileIndex::open(&dir.path().join("vault/.vault/index.db")).unwrap());
        Self { dir, index }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn mover(&self) -> FileMover {
        FileMover::for_vault(
            self.index.clone(),
            self.path("vault/quarantine"),
            self.path("vault/duplicates"),
        )
    }

    pub fn ingestor(&self) -> FileIngestor {
        FileIngestor::new(self.index.clone())
    }
}
