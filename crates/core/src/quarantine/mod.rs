//! Holding area for files that could not be placed.

mod manager;
mod naming;
mod reason;

pub use manager::{QuarantineManager, QuarantineRecord, QuarantineStats, RecoveryAttempt};
pub use naming::{sanitize_filename, MAX_NAME_CHARS};
pub use reason::{classify_error, classify_move_error, QuarantineReason, Severity};
