//! Verified placement of files into the vault.

pub mod atomic;
pub mod duplicates;
mod file_mover;
pub mod fsops;

pub use atomic::{AtomicMover, MoveFailure, MoveSuccess, RollbackOutcome, TimestampOutcome};
pub use duplicates::{DuplicateHandler, IndexedDuplicateHandler};
pub use file_mover::{FileMover, DEFAULT_SPACE_SAFETY_MARGIN};
pub use fsops::{relocate, Relocation};
