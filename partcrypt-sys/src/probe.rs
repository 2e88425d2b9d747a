// SPDX-License-Identifier: GPL-3.0-only

//! Partition discovery from `lsblk --json`

use std::path::{Path, PathBuf};

use partcrypt_types::{FilesystemType, Partition};
use serde::Deserialize;
use tracing::debug;

use crate::blkid;
use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};

const LSBLK_COLUMNS: &str = "PATH,FSTYPE,LABEL,UUID,MOUNTPOINT,RM,TYPE";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

/// Older lsblk releases print booleans as "0"/"1"
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LsblkFlag {
    Bool(bool),
    Text(String),
}

impl LsblkFlag {
    fn is_set(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LsblkDevice {
    path: PathBuf,
    fstype: Option<String>,
    label: Option<String>,
    uuid: Option<String>,
    mountpoint: Option<PathBuf>,
    rm: Option<LsblkFlag>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn is_crypt(&self) -> bool {
        self.kind.as_deref() == Some("crypt")
    }

    fn is_removable(&self) -> bool {
        self.rm.as_ref().is_some_and(LsblkFlag::is_set)
    }
}

pub fn parse_lsblk(json: &str) -> Result<Vec<LsblkDevice>> {
    serde_json::from_str::<LsblkOutput>(json)
        .map(|output| output.blockdevices)
        .map_err(|error| SysError::Parse {
            tool: "lsblk".to_string(),
            reason: error.to_string(),
        })
}

/// Build a partition record from an lsblk entry
///
/// An unlocked container is described by its mapped child; `original_device`
/// always keeps the raw path.
pub fn partition_from_lsblk(entry: &LsblkDevice) -> Partition {
    let visible = entry
        .children
        .iter()
        .find(|child| child.is_crypt())
        .unwrap_or(entry);

    let fs_type = visible
        .fstype
        .as_deref()
        .map(FilesystemType::parse)
        .unwrap_or_default();

    let mut partition = Partition::new(visible.path.clone(), fs_type);
    partition.original_device = entry.path.clone();
    partition.label = visible.label.clone().filter(|label| !label.is_empty());
    partition.uuid = visible.uuid.clone().filter(|uuid| !uuid.is_empty());
    partition.mount_point = visible
        .mountpoint
        .clone()
        .filter(|mount_point| !mount_point.as_os_str().is_empty());
    partition.is_encrypted = visible.is_crypt()
        || entry
            .fstype
            .as_deref()
            .is_some_and(|fs_type| FilesystemType::parse(fs_type).is_encryption_layer());
    partition.is_removable = entry.is_removable();
    partition
}

/// Probe a partition by device path
pub fn probe_partition(device: &Path) -> Result<Partition> {
    let output = ToolCommand::new("lsblk")
        .args(["--json", "--output", LSBLK_COLUMNS])
        .arg(device)
        .run()?;

    let entry = parse_lsblk(&output.stdout)?
        .into_iter()
        .next()
        .ok_or_else(|| SysError::DeviceNotFound(device.display().to_string()))?;
    let mut partition = partition_from_lsblk(&entry);

    let raw = blkid::raw_device(&partition.original_device)?;
    partition.original_device = raw.clone();
    partition.has_bootloader = match blkid::has_grub(&raw) {
        Ok(found) => found,
        Err(error) => {
            debug!("Could not read boot sector of {}: {}", raw.display(), error);
            false
        }
    };

    Ok(partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = r#"{
       "blockdevices": [
          {"path":"/dev/sda2", "fstype":"ext4", "label":"root", "uuid":"1111-aaaa", "mountpoint":"/", "rm":false, "type":"part"}
       ]
    }"#;

    const UNLOCKED: &str = r#"{
       "blockdevices": [
          {"path":"/dev/sdb1", "fstype":"crypto_LUKS", "label":null, "uuid":"2222-bbbb", "mountpoint":null, "rm":"1", "type":"part",
             "children": [
                {"path":"/dev/mapper/sdb1", "fstype":"xfs", "label":"data", "uuid":"3333-cccc", "mountpoint":"/media/data", "rm":"0", "type":"crypt"}
             ]
          }
       ]
    }"#;

    const LOCKED: &str = r#"{
       "blockdevices": [
          {"path":"/dev/sdc1", "fstype":"crypto_LUKS", "label":null, "uuid":"4444-dddd", "mountpoint":null, "rm":false, "type":"part"}
       ]
    }"#;

    fn first(json: &str) -> Partition {
        let devices = parse_lsblk(json).expect("valid json");
        partition_from_lsblk(&devices[0])
    }

    #[test]
    fn plain_partition() {
        let partition = first(PLAIN);
        assert_eq!(partition.device, PathBuf::from("/dev/sda2"));
        assert_eq!(partition.filesystem_type, FilesystemType::Ext4);
        assert_eq!(partition.label.as_deref(), Some("root"));
        assert!(partition.is_root());
        assert!(!partition.is_encrypted);
        assert!(!partition.is_removable);
    }

    #[test]
    fn unlocked_container_uses_mapped_child() {
        let partition = first(UNLOCKED);
        assert_eq!(partition.device, PathBuf::from("/dev/mapper/sdb1"));
        assert_eq!(partition.original_device, PathBuf::from("/dev/sdb1"));
        assert_eq!(partition.filesystem_type, FilesystemType::Xfs);
        assert_eq!(partition.uuid.as_deref(), Some("3333-cccc"));
        assert_eq!(partition.mount_point, Some(PathBuf::from("/media/data")));
        assert!(partition.is_encrypted);
        assert!(partition.is_removable);
    }

    #[test]
    fn locked_container_reports_encryption_layer() {
        let partition = first(LOCKED);
        assert_eq!(partition.filesystem_type, FilesystemType::CryptoLuks);
        assert!(partition.is_encrypted);
        assert!(partition.mount_point.is_none());
    }

    #[test]
    fn rejects_malformed_output() {
        assert!(matches!(
            parse_lsblk("not json"),
            Err(SysError::Parse { .. })
        ));
    }
}
