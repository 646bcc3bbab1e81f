use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Move(#[from] MoveError),
}

/// Step of a move at which an I/O failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStage {
    Hash,
    CreateParent,
    Rename,
    Copy,
    Verify,
    Rollback,
}

impl fmt::Display for MoveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoveStage::Hash => "hash",
            MoveStage::CreateParent => "create parent",
            MoveStage::Rename => "rename",
            MoveStage::Copy => "copy",
            MoveStage::Verify => "verify",
            MoveStage::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Closed set of failures produced by the mover and the integrity verifier.
///
/// Quarantine classification matches on these variants, never on message text.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {}: expected {expected} bytes, got {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("insufficient disk space on {}: need {required} bytes, {available} available", mount.display())]
    InsufficientSpace {
        mount: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("path too long: {}", .0.display())]
    PathTooLong(PathBuf),

    #[error("invalid characters in path: {}", .0.display())]
    InvalidCharacters(PathBuf),

    #[error("source disappeared before move: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("{stage} failed for {}: {source}", path.display())]
    Io {
        stage: MoveStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MoveError {
    pub fn io(stage: MoveStage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MoveError::Io {
            stage,
            path: path.into(),
            source,
        }
    }
}
