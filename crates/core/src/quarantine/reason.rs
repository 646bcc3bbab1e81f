use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, MoveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    PermissionError,
    DiskSpaceError,
    CorruptionDetected,
    ChecksumMismatch,
    PathTooLong,
    InvalidCharacters,
    DestinationExists,
    NetworkError,
    UnknownError,
}

impl QuarantineReason {
    pub const ALL: [QuarantineReason; 9] = [
        QuarantineReason::PermissionError,
        QuarantineReason::DiskSpaceError,
        QuarantineReason::CorruptionDetected,
        QuarantineReason::ChecksumMismatch,
        QuarantineReason::PathTooLong,
        QuarantineReason::InvalidCharacters,
        QuarantineReason::DestinationExists,
        QuarantineReason::NetworkError,
        QuarantineReason::UnknownError,
    ];

    /// Directory name under the quarantine root.
    pub fn as_str(self) -> &'static str {
        match self {
            QuarantineReason::PermissionError => "permission_error",
            QuarantineReason::DiskSpaceError => "disk_space_error",
            QuarantineReason::CorruptionDetected => "corruption_detected",
            QuarantineReason::ChecksumMismatch => "checksum_mismatch",
            QuarantineReason::PathTooLong => "path_too_long",
            QuarantineReason::InvalidCharacters => "invalid_characters",
            QuarantineReason::DestinationExists => "destination_exists",
            QuarantineReason::NetworkError => "network_error",
            QuarantineReason::UnknownError => "unknown_error",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            QuarantineReason::PermissionError | QuarantineReason::DiskSpaceError => {
                Severity::Critical
            }
            QuarantineReason::CorruptionDetected
            | QuarantineReason::ChecksumMismatch
            | QuarantineReason::UnknownError => Severity::Error,
            QuarantineReason::PathTooLong | QuarantineReason::InvalidCharacters => {
                Severity::Warning
            }
            QuarantineReason::DestinationExists | QuarantineReason::NetworkError => Severity::Info,
        }
    }

    /// Reasons a later pass may resubmit without operator changes to the
    /// file itself.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            QuarantineReason::PermissionError
                | QuarantineReason::DiskSpaceError
                | QuarantineReason::NetworkError
                | QuarantineReason::DestinationExists
        )
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuarantineReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let needle = s.trim().to_ascii_lowercase();
        QuarantineReason::ALL
            .into_iter()
            .find(|r| r.as_str() == needle)
            .ok_or_else(|| Error::InvalidInput(format!("unknown quarantine reason: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn escalate(self) -> Severity {
        match self {
            Severity::Info => Severity::Warning,
            Severity::Warning => Severity::Error,
            Severity::Error | Severity::Critical => Severity::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a failure to its quarantine bucket. `None` and anything unmapped
/// land in [`QuarantineReason::UnknownError`].
pub fn classify_error(error: Option<&Error>) -> QuarantineReason {
    match error {
        None => QuarantineReason::UnknownError,
        Some(Error::Move(e)) => classify_move_error(e),
        Some(Error::Io(e)) => classify_io_error(e),
        Some(_) => QuarantineReason::UnknownError,
    }
}

pub fn classify_move_error(error: &MoveError) -> QuarantineReason {
    match error {
        MoveError::ChecksumMismatch { .. } => QuarantineReason::ChecksumMismatch,
        MoveError::SizeMismatch { .. } => QuarantineReason::CorruptionDetected,
        MoveError::InsufficientSpace { .. } => QuarantineReason::DiskSpaceError,
        MoveError::PathTooLong(_) => QuarantineReason::PathTooLong,
        MoveError::InvalidCharacters(_) => QuarantineReason::InvalidCharacters,
        MoveError::DestinationExists(_) => QuarantineReason::DestinationExists,
        MoveError::SourceMissing(_) => QuarantineReason::UnknownError,
        MoveError::Io { source, .. } => classify_io_error(source),
    }
}

fn classify_io_error(error: &io::Error) -> QuarantineReason {
    if let Some(reason) = error.raw_os_error().and_then(classify_os_code) {
        return reason;
    }
    match error.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            QuarantineReason::CorruptionDetected
        }
        io::ErrorKind::PermissionDenied => QuarantineReason::PermissionError,
        io::ErrorKind::AlreadyExists => QuarantineReason::DestinationExists,
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => QuarantineReason::NetworkError,
        _ => QuarantineReason::UnknownError,
    }
}

#[cfg(unix)]
fn classify_os_code(code: i32) -> Option<QuarantineReason> {
    match code {
        libc::ENOSPC | libc::EDQUOT => Some(QuarantineReason::DiskSpaceError),
        libc::EACCES | libc::EPERM | libc::EROFS => Some(QuarantineReason::PermissionError),
        libc::ENAMETOOLONG => Some(QuarantineReason::PathTooLong),
        libc::EILSEQ => Some(QuarantineReason::InvalidCharacters),
        libc::EEXIST | libc::ENOTEMPTY => Some(QuarantineReason::DestinationExists),
        libc::ESTALE | libc::ENETDOWN | libc::ENETUNREACH | libc::EHOSTDOWN
        | libc::EHOSTUNREACH | libc::ETIMEDOUT | libc::ECONNRESET => {
            Some(QuarantineReason::NetworkError)
        }
        libc::EIO => Some(QuarantineReason::CorruptionDetected),
        _ => None,
    }
}

// ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL, ERROR_FILENAME_EXCED_RANGE,
// ERROR_INVALID_NAME, ERROR_BAD_NETPATH, ERROR_NETNAME_DELETED.
#[cfg(windows)]
fn classify_os_code(code: i32) -> Option<QuarantineReason> {
    match code {
        39 | 112 => Some(QuarantineReason::DiskSpaceError),
        206 => Some(QuarantineReason::PathTooLong),
        123 => Some(QuarantineReason::InvalidCharacters),
        53 | 64 => Some(QuarantineReason::NetworkError),
        _ => None,
    }
}

#[cfg(not(any(unix, windows)))]
fn classify_os_code(_code: i32) -> Option<QuarantineReason> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoveStage;
    use std::path::PathBuf;

    fn io_err(kind: io::ErrorKind) -> Error {
        Error::Io(io::Error::new(kind, "boom"))
    }

    #[test]
    fn permission_denied_is_critical() {
        let reason = classify_error(Some(&io_err(io::ErrorKind::PermissionDenied)));
        assert_eq!(reason, QuarantineReason::PermissionError);
        assert_eq!(reason.default_severity(), Severity::Critical);
        assert!(reason.is_retryable());
    }

    #[test]
    fn integrity_variants_classify_first() {
        let mismatch = Error::Move(MoveError::ChecksumMismatch {
            path: PathBuf::from("/a"),
            expected: "a".into(),
            actual: "b".into(),
        });
        assert_eq!(classify_error(Some(&mismatch)), QuarantineReason::ChecksumMismatch);
        let size = Error::Move(MoveError::SizeMismatch {
            path: PathBuf::from("/a"),
            expected: 1,
            actual: 2,
        });
        assert_eq!(classify_error(Some(&size)), QuarantineReason::CorruptionDetected);
        assert!(!QuarantineReason::ChecksumMismatch.is_retryable());
    }

    #[test]
    fn wrapped_io_is_classified_by_kind() {
        let e = Error::Move(MoveError::io(
            MoveStage::Rename,
            "/a",
            io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        ));
        assert_eq!(classify_error(Some(&e)), QuarantineReason::DestinationExists);
        assert_eq!(
            classify_error(Some(&io_err(io::ErrorKind::TimedOut))),
            QuarantineReason::NetworkError
        );
        assert_eq!(
            classify_error(Some(&io_err(io::ErrorKind::InvalidData))),
            QuarantineReason::CorruptionDetected
        );
    }

    #[cfg(unix)]
    #[test]
    fn raw_os_codes_are_mapped() {
        let full = Error::Io(io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(classify_error(Some(&full)), QuarantineReason::DiskSpaceError);
        let long = Error::Io(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        assert_eq!(classify_error(Some(&long)), QuarantineReason::PathTooLong);
    }

    #[test]
    fn unmapped_fails_closed() {
        assert_eq!(classify_error(None), QuarantineReason::UnknownError);
        assert_eq!(
            classify_error(Some(&Error::InvalidInput("x".into()))),
            QuarantineReason::UnknownError
        );
        assert_eq!(
            classify_error(Some(&io_err(io::ErrorKind::Other))),
            QuarantineReason::UnknownError
        );
    }

    #[test]
    fn severity_is_ordered_and_escalates_one_step() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Warning.escalate(), Severity::Error);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn reason_round_trips_through_dir_name() {
        for r in QuarantineReason::ALL {
            assert_eq!(r.as_str().parse::<QuarantineReason>().unwrap(), r);
            assert_eq!(serde_json::to_string(&r).unwrap(), format!("\"{}\"", r.as_str()));
        }
    }
}
