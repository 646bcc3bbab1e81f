use std::path::{Path, PathBuf};

use sysinfo::Disks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceInfo {
    pub mount_point: PathBuf,
    pub available_bytes: u64,
}

/// Free space on the filesystem that would hold `path`.
///
/// `path` need not exist yet; its nearest existing ancestor decides the
/// mount. Returns `None` when no mounted disk covers it.
pub fn space_for_path(path: &Path) -> Option<SpaceInfo> {
    let anchor = nearest_existing_ancestor(path)?;
    let canonical = std::fs::canonicalize(&anchor).unwrap_or(anchor);
    let disks = Disks::new_with_refreshed_list();
    best_mount_for_path(
        &canonical,
        disks
            .list()
            .iter()
            .map(|d| (d.mount_point().to_path_buf(), d.available_space())),
    )
}

fn best_mount_for_path<I>(path: &Path, mounts: I) -> Option<SpaceInfo>
where
    I: IntoIterator<Item = (PathBuf, u64)>,
{
    let mut best: Option<SpaceInfo> = None;
    for (mount_point, available_bytes) in mounts {
        if !path.starts_with(&mount_point) {
            continue;
        }
        let replace = match &best {
            None => true,
            Some(cur) => mount_point.as_os_str().len() > cur.mount_point.as_os_str().len(),
        };
        if replace {
            best = Some(SpaceInfo {
                mount_point,
                available_bytes,
            });
        }
    }
    best
}

pub fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(p) = current {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        current = p.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_mount_prefix_wins() {
        let mounts = vec![
            (PathBuf::from("/"), 10),
            (PathBuf::from("/home"), 20),
            (PathBuf::from("/home/user/media"), 30),
        ];
        let info = best_mount_for_path(Path::new("/home/user/docs/a.txt"), mounts).unwrap();
        assert_eq!(info.mount_point, PathBuf::from("/home"));
        assert_eq!(info.available_bytes, 20);
    }

    #[test]
    fn unrelated_mounts_do_not_match() {
        let mounts = vec![(PathBuf::from("/mnt/usb"), 5)];
        assert!(best_mount_for_path(Path::new("/srv/data"), mounts).is_none());
    }

    #[test]
    fn ancestor_of_missing_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a/b/c.txt");
        assert_eq!(nearest_existing_ancestor(&missing).unwrap(), dir.path());
    }
}
