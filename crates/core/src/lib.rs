pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod mover;
pub mod quarantine;
pub mod registry;

pub use crate::config::VaultConfig;
pub use crate::error::{Error, MoveError, MoveStage, Result};
pub use crate::ingest::{CancelToken, FileIngestor};
pub use crate::metadata::MetadataConsolidator;
pub use crate::models::*;
pub use crate::mover::FileMover;
pub use crate::quarantine::QuarantineManager;
