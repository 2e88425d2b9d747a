// SPDX-License-Identifier: GPL-3.0-only

//! Per-partition backup areas under `<backup_root>/luks_bak/`
//!
//! A backup area exists from before the first destructive step until the
//! data has been restored. Finding one at any other time means an earlier
//! migration was interrupted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use partcrypt_types::device_basename;
use tracing::debug;

pub const BACKUP_DIR_NAME: &str = "luks_bak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArea {
    parent: PathBuf,
    path: PathBuf,
}

impl BackupArea {
    pub fn path_for(backup_root: &Path, device: &Path) -> PathBuf {
        backup_root
            .join(BACKUP_DIR_NAME)
            .join(device_basename(device))
    }

    /// Create the backup area for `device`
    ///
    /// Fails with `AlreadyExists` when a leftover area is in the way; it may
    /// hold the only copy of an interrupted migration's data.
    pub fn create(backup_root: &Path, device: &Path) -> io::Result<Self> {
        let parent = backup_root.join(BACKUP_DIR_NAME);
        let path = Self::path_for(backup_root, device);
        fs::create_dir_all(&parent)?;
        fs::create_dir(&path)?;
        debug!("Backup area: {}", path.display());
        Ok(Self { parent, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the area, and the shared `luks_bak` directory once empty
    pub fn remove(self) -> io::Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)?;
        }
        let is_empty = fs::read_dir(&self.parent)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            fs::remove_dir(&self.parent)?;
        }
        Ok(())
    }

    /// Leftover backup areas from interrupted migrations
    pub fn find_interrupted(backup_root: &Path) -> io::Result<Vec<PathBuf>> {
        let parent = backup_root.join(BACKUP_DIR_NAME);
        let entries = match fs::read_dir(&parent) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };

        let mut found: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_is_named_after_device() {
        assert_eq!(
            BackupArea::path_for(Path::new("/backup"), Path::new("/dev/mapper/sdb1")),
            PathBuf::from("/backup/luks_bak/sdb1")
        );
    }

    #[test]
    fn leftover_area_is_never_reused() {
        let root = tempfile::tempdir().expect("tempdir");
        let leftover = BackupArea::path_for(root.path(), Path::new("/dev/sdb1"));
        fs::create_dir_all(&leftover).expect("mkdir");
        fs::write(leftover.join("stale"), "old data").expect("write");

        let error = BackupArea::create(root.path(), Path::new("/dev/sdb1")).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
        assert!(leftover.join("stale").exists());
    }

    #[test]
    fn removing_last_area_removes_shared_dir() {
        let root = tempfile::tempdir().expect("tempdir");
        let first = BackupArea::create(root.path(), Path::new("/dev/sda1")).expect("create");
        let second = BackupArea::create(root.path(), Path::new("/dev/sdb1")).expect("create");
        fs::write(first.path().join("file"), "data").expect("write");

        assert_eq!(
            BackupArea::find_interrupted(root.path()).expect("scan"),
            vec![first.path().to_path_buf(), second.path().to_path_buf()]
        );

        first.remove().expect("remove");
        assert!(root.path().join(BACKUP_DIR_NAME).exists());
        second.remove().expect("remove");
        assert!(!root.path().join(BACKUP_DIR_NAME).exists());
        assert!(BackupArea::find_interrupted(root.path()).expect("scan").is_empty());
    }
}
