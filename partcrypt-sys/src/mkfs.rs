// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem creation and labelling

use std::ffi::OsString;
use std::path::Path;

use partcrypt_types::FilesystemType;
use tracing::{info, warn};

use crate::blkid;
use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatOutcome {
    /// Set when the filesystem was created but the label could not be applied
    pub label_warning: Option<String>,
}

/// Tool invocation creating `filesystem_type` on `device`
pub fn format_command(filesystem_type: &FilesystemType, device: &Path) -> Result<ToolCommand> {
    if filesystem_type.is_unknown() || filesystem_type.is_encryption_layer() {
        return Err(SysError::MissingFilesystemType(device.display().to_string()));
    }

    let command = match filesystem_type {
        FilesystemType::Swap => ToolCommand::new("mkswap"),
        fs_type if fs_type.is_ext_family() => {
            ToolCommand::new(format!("mkfs.{fs_type}")).args(["-F", "-q"])
        }
        FilesystemType::Jfs => ToolCommand::new("mkfs.jfs").arg("-q"),
        FilesystemType::Xfs => ToolCommand::new("mkfs.xfs").arg("-f"),
        FilesystemType::Btrfs => ToolCommand::new("mkfs.btrfs").arg("-f"),
        FilesystemType::Vfat => ToolCommand::new("mkfs.vfat").args(["-F", "32"]),
        FilesystemType::Ntfs => ToolCommand::new("mkfs.ntfs").args(["-Q", "-F"]),
        other => ToolCommand::new(format!("mkfs.{other}")),
    };
    Ok(command.arg(device))
}

/// Tool invocation setting `label` on a `filesystem_type` filesystem
pub fn label_command(
    filesystem_type: &FilesystemType,
    device: &Path,
    label: &str,
) -> Option<ToolCommand> {
    let device = OsString::from(device);
    let command = match filesystem_type {
        FilesystemType::Swap => ToolCommand::new("swaplabel")
            .arg("-L")
            .arg(label)
            .arg(device),
        fs_type if fs_type.is_ext_family() => ToolCommand::new("e2label").arg(device).arg(label),
        FilesystemType::Xfs => ToolCommand::new("xfs_admin")
            .arg("-L")
            .arg(label)
            .arg(device),
        FilesystemType::Btrfs => ToolCommand::new("btrfs")
            .args(["filesystem", "label"])
            .arg(device)
            .arg(label),
        FilesystemType::Jfs => ToolCommand::new("jfs_tune")
            .arg("-L")
            .arg(label)
            .arg(device),
        FilesystemType::Vfat => ToolCommand::new("fatlabel").arg(device).arg(label),
        FilesystemType::Ntfs => ToolCommand::new("ntfslabel").arg(device).arg(label),
        FilesystemType::Exfat => ToolCommand::new("exfatlabel").arg(device).arg(label),
        _ => return None,
    };
    Some(command)
}

fn apply_label(filesystem_type: &FilesystemType, device: &Path, label: &str) -> Result<()> {
    let command = label_command(filesystem_type, device, label).ok_or_else(|| {
        SysError::OperationFailed(format!("labels are not supported on {filesystem_type}"))
    })?;
    which::which(command.program())
        .map_err(|_| SysError::ToolNotFound(command.program().to_string()))?;
    command.run()?;
    Ok(())
}

/// Create a `filesystem_type` filesystem on `device`, then apply `label`
///
/// The type blkid reports afterwards must match the requested one. A label
/// failure does not fail the format.
pub fn format(
    device: &Path,
    filesystem_type: &FilesystemType,
    label: Option<&str>,
) -> Result<FormatOutcome> {
    let command = format_command(filesystem_type, device)?;
    which::which(command.program())
        .map_err(|_| SysError::ToolNotFound(command.program().to_string()))?;

    info!("Formatting {} as {}", device.display(), filesystem_type);
    command.run()?;

    let found = blkid::filesystem_type(device)?;
    if found.as_ref() != Some(filesystem_type) {
        return Err(SysError::FilesystemMismatch {
            device: device.display().to_string(),
            expected: filesystem_type.to_string(),
            found: found.map(|fs_type| fs_type.to_string()).unwrap_or_default(),
        });
    }

    let mut outcome = FormatOutcome::default();
    if let Some(label) = label.filter(|label| !label.is_empty())
        && let Err(error) = apply_label(filesystem_type, device, label)
    {
        warn!("Could not label {}: {}", device.display(), error);
        outcome.label_warning = Some(error.to_string());
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(fs_type: FilesystemType) -> String {
        format_command(&fs_type, Path::new("/dev/mapper/sdb1"))
            .expect("supported")
            .render()
    }

    #[test]
    fn format_commands() {
        assert_eq!(rendered(FilesystemType::Swap), "mkswap /dev/mapper/sdb1");
        assert_eq!(
            rendered(FilesystemType::Ext4),
            "mkfs.ext4 -F -q /dev/mapper/sdb1"
        );
        assert_eq!(
            rendered(FilesystemType::Ext2),
            "mkfs.ext2 -F -q /dev/mapper/sdb1"
        );
        assert_eq!(rendered(FilesystemType::Jfs), "mkfs.jfs -q /dev/mapper/sdb1");
        assert_eq!(rendered(FilesystemType::Xfs), "mkfs.xfs -f /dev/mapper/sdb1");
        assert_eq!(
            rendered(FilesystemType::Vfat),
            "mkfs.vfat -F 32 /dev/mapper/sdb1"
        );
        assert_eq!(
            rendered(FilesystemType::Other("minix".into())),
            "mkfs.minix /dev/mapper/sdb1"
        );
    }

    #[test]
    fn unknown_type_cannot_be_formatted() {
        for fs_type in [FilesystemType::default(), FilesystemType::CryptoLuks] {
            assert!(matches!(
                format_command(&fs_type, Path::new("/dev/sdb1")),
                Err(SysError::MissingFilesystemType(_))
            ));
        }
    }

    #[test]
    fn label_commands() {
        let device = Path::new("/dev/sdb1");
        let render = |fs_type| {
            label_command(&fs_type, device, "data")
                .map(|command| command.render())
                .unwrap_or_default()
        };
        assert_eq!(render(FilesystemType::Swap), "swaplabel -L data /dev/sdb1");
        assert_eq!(render(FilesystemType::Ext3), "e2label /dev/sdb1 data");
        assert_eq!(render(FilesystemType::Xfs), "xfs_admin -L data /dev/sdb1");
        assert_eq!(
            render(FilesystemType::Btrfs),
            "btrfs filesystem label /dev/sdb1 data"
        );
        assert_eq!(render(FilesystemType::Other("minix".into())), "");
    }
}
