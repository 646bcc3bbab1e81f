use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{MoveError, MoveStage};

/// How a file reached its new location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    Renamed,
    CopiedAcrossDevices,
    /// The copy at the destination is complete but the source could not be
    /// removed afterwards.
    CopiedSourceRetained,
}

impl Relocation {
    pub fn source_retained(self) -> bool {
        self == Relocation::CopiedSourceRetained
    }
}

/// Signature shared by [`relocate`] and the stand-ins tests swap in for it.
pub(crate) type RelocateFn = fn(&Path, &Path) -> Result<Relocation, MoveError>;

/// Moves `src` to `dst`, copying and deleting when the two paths live on
/// different filesystems. `dst` must not exist.
pub fn relocate(src: &Path, dst: &Path) -> Result<Relocation, MoveError> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(Relocation::Renamed),
        Err(e) if is_cross_device(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), "rename crosses devices, copying");
            copy_durable(src, dst)?;
            Ok(remove_after_copy(src, dst, |p| fs::remove_file(p)))
        }
        Err(e) => Err(MoveError::io(MoveStage::Rename, src, e)),
    }
}

/// Once `dst` holds a full copy the move has happened; a source that will
/// not go away is reported, not treated as a failed move.
fn remove_after_copy<F>(src: &Path, dst: &Path, remove: F) -> Relocation
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    match remove(src) {
        Ok(()) => Relocation::CopiedAcrossDevices,
        Err(e) => {
            warn!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "copied across devices but could not remove the source"
            );
            Relocation::CopiedSourceRetained
        }
    }
}

/// Copies `src` to a new file at `dst` and syncs it to disk. A partial
/// destination is removed on failure.
pub fn copy_durable(src: &Path, dst: &Path) -> Result<(), MoveError> {
    let result = (|| -> io::Result<()> {
        let mut reader = File::open(src)?;
        let mut writer = OpenOptions::new().write(true).create_new(true).open(dst)?;
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()
    })();
    if let Err(e) = result {
        if e.kind() != io::ErrorKind::AlreadyExists {
            let _ = fs::remove_file(dst);
        }
        return Err(MoveError::io(MoveStage::Copy, dst, e));
    }
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

// ERROR_NOT_SAME_DEVICE
#[cfg(windows)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_device_rename() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"data").unwrap();
        assert_eq!(relocate(&src, &dst).unwrap(), Relocation::Renamed);
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"data");
    }

    #[test]
    fn copy_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();
        assert!(copy_durable(&src, &dst).is_err());
        assert_eq!(fs::read(&dst).unwrap(), b"old");
    }

    #[test]
    fn failed_source_removal_still_counts_as_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"payload").unwrap();
        copy_durable(&src, &dst).unwrap();

        let outcome = remove_after_copy(&src, &dst, |_| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });
        assert_eq!(outcome, Relocation::CopiedSourceRetained);
        assert!(outcome.source_retained());
        assert!(src.is_file());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");

        let src2 = dir.path().join("c");
        fs::write(&src2, b"x").unwrap();
        let removed = remove_after_copy(&src2, &dst, |p| fs::remove_file(p));
        assert_eq!(removed, Relocation::CopiedAcrossDevices);
        assert!(!src2.exists());
    }

    #[test]
    fn missing_source_reports_rename_stage() {
        let dir = tempfile::tempdir().unwrap();
        let err = relocate(&dir.path().join("nope"), &dir.path().join("b")).unwrap_err();
        assert!(matches!(err, MoveError::Io { stage: MoveStage::Rename, .. }));
    }
}
