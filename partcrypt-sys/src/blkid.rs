// SPDX-License-Identifier: GPL-3.0-only

//! Device status queries (blkid, cryptsetup status)

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use partcrypt_types::{
    DeviceStatus, FilesystemType, device_basename, is_mapped_path, mapped_path_for, strip_mapper,
};
use tracing::debug;

use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};

const MAPPER_DIR: &str = "/dev/mapper";
const LUKS_MAPPING_PREFIX: &str = "luks-";
const SECTOR_SIZE: u64 = 512;

/// blkid exits with 2 when the requested tag is not present
const BLKID_NOT_FOUND: i32 = 2;

fn blkid_tag(device: &Path, tag: &str) -> Result<Option<String>> {
    let output = ToolCommand::new("blkid")
        .args(["-o", "value", "-s", tag])
        .arg(device)
        .output()?;
    if output.code == Some(BLKID_NOT_FOUND) {
        return Ok(None);
    }
    if !output.success() {
        return Err(output.into_error());
    }
    Ok(output.first_line())
}

/// Filesystem type as reported by blkid, `None` for a blank device
pub fn filesystem_type(device: &Path) -> Result<Option<FilesystemType>> {
    Ok(blkid_tag(device, "TYPE")?.map(|value| FilesystemType::parse(&value)))
}

pub fn uuid(device: &Path) -> Result<Option<String>> {
    blkid_tag(device, "UUID")
}

pub fn label(device: &Path) -> Result<Option<String>> {
    blkid_tag(device, "LABEL")
}

/// Resolve a filesystem (or LUKS container) UUID to its device path
pub fn device_from_uuid(uuid: &str) -> Result<Option<PathBuf>> {
    let uuid = uuid.trim_start_matches("UUID=");
    let output = ToolCommand::new("blkid").arg("-U").arg(uuid).output()?;
    if output.code == Some(BLKID_NOT_FOUND) {
        return Ok(None);
    }
    if !output.success() {
        return Err(output.into_error());
    }
    Ok(output.first_line().map(PathBuf::from))
}

/// Parse `LANG=C cryptsetup status <name>` output
///
/// Fields the tool omits are left unset; the filesystem type is filled in
/// by [`status`].
pub fn parse_cryptsetup_status(device: &Path, text: &str) -> DeviceStatus {
    let mut status = DeviceStatus {
        device: device.to_path_buf(),
        ..DeviceStatus::default()
    };

    let mut lines = text.lines();
    if let Some(first) = lines.next()
        && let Some((mapped, state)) = first.trim().split_once(" is ")
        && state.starts_with("active")
    {
        status.is_active = true;
        status.mapped_path = Some(PathBuf::from(mapped.trim()));
    }

    if !status.is_active {
        return status;
    }

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "cipher" => status.cipher = Some(value.to_string()),
            "keysize" => {
                status.key_size = value
                    .split_whitespace()
                    .next()
                    .and_then(|bits| bits.parse().ok());
            }
            "device" => status.backing_device = Some(PathBuf::from(value)),
            "size" => {
                status.raw_size = value
                    .split_whitespace()
                    .next()
                    .and_then(|sectors| sectors.parse::<u64>().ok())
                    .map(|sectors| sectors * SECTOR_SIZE);
            }
            _ => {}
        }
    }

    status
}

/// Mapper `name` belongs to `key` (device basename or container UUID)
fn is_mapping_for(name: &str, key: &str) -> bool {
    name == key || name.strip_prefix(LUKS_MAPPING_PREFIX) == Some(key)
}

/// Find the mapped device of an unlocked container
///
/// Checks `/dev/mapper/<basename>` first, then a mapping named after the
/// device basename or the container UUID, bare or as `luks-<name>`.
pub fn find_mapped_device(device: &Path) -> Result<Option<PathBuf>> {
    if is_mapped_path(device) {
        return Ok(device.exists().then(|| device.to_path_buf()));
    }

    let direct = mapped_path_for(device);
    if direct.exists() {
        return Ok(Some(direct));
    }

    let Ok(entries) = fs::read_dir(MAPPER_DIR) else {
        return Ok(None);
    };
    let names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "control")
        .collect();

    let basename = device_basename(device);
    if let Some(name) = names.iter().find(|name| is_mapping_for(name, &basename)) {
        return Ok(Some(Path::new(MAPPER_DIR).join(name)));
    }

    if let Some(container_uuid) = uuid(device)?
        && let Some(name) = names.iter().find(|name| is_mapping_for(name, &container_uuid))
    {
        return Ok(Some(Path::new(MAPPER_DIR).join(name)));
    }

    Ok(None)
}

/// Encryption, mapping and filesystem state of `device`
///
/// Accepts either the raw device or its mapped path. A device without an
/// encryption layer is reported inactive.
pub fn status(device: &Path) -> Result<DeviceStatus> {
    let mapped = find_mapped_device(device)?;

    let mut status = match &mapped {
        Some(mapped) => {
            let output = ToolCommand::new("cryptsetup")
                .env("LANG", "C")
                .arg("status")
                .arg(device_basename(mapped))
                .output()?;
            parse_cryptsetup_status(device, &output.stdout)
        }
        None => DeviceStatus {
            device: device.to_path_buf(),
            ..DeviceStatus::default()
        },
    };

    let probe_target = status
        .mapped_path
        .clone()
        .unwrap_or_else(|| device.to_path_buf());
    status.filesystem_type = filesystem_type(&probe_target)?.unwrap_or_default();

    debug!(
        "Status of {}: active={}, fs={}",
        device.display(),
        status.is_active,
        status.filesystem_type
    );
    Ok(status)
}

/// True when `device` is a mapped device or carries an encryption layer
pub fn is_encrypted(device: &Path) -> Result<bool> {
    if is_mapped_path(device) {
        return Ok(true);
    }
    Ok(filesystem_type(device)?.is_some_and(|fs_type| fs_type.is_encryption_layer()))
}

/// Raw device behind a mapped path; raw paths are returned unchanged
pub fn raw_device(device: &Path) -> Result<PathBuf> {
    if !is_mapped_path(device) {
        return Ok(device.to_path_buf());
    }

    let output = ToolCommand::new("cryptsetup")
        .env("LANG", "C")
        .arg("status")
        .arg(device_basename(device))
        .output()?;
    let status = parse_cryptsetup_status(device, &output.stdout);
    Ok(status
        .backing_device
        .unwrap_or_else(|| strip_mapper(device)))
}

/// True when the first sector of `device` contains a GRUB signature
pub fn has_grub(device: &Path) -> Result<bool> {
    let mut file = File::open(device).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => SysError::DeviceNotFound(device.display().to_string()),
        std::io::ErrorKind::PermissionDenied => {
            SysError::PermissionDenied(device.display().to_string())
        }
        _ => SysError::Io(error),
    })?;
    let mut sector = Vec::with_capacity(SECTOR_SIZE as usize);
    file.by_ref().take(SECTOR_SIZE).read_to_end(&mut sector)?;
    Ok(contains_grub_signature(&sector))
}

fn contains_grub_signature(sector: &[u8]) -> bool {
    sector
        .windows(4)
        .any(|window| window.eq_ignore_ascii_case(b"GRUB"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIVE: &str = "/dev/mapper/sdb1 is active and is in use.\n\
          type:    LUKS2\n\
          cipher:  aes-xts-plain64\n\
          keysize: 512 bits\n\
          key location: keyring\n\
          device:  /dev/sdb1\n\
          sector size:  512\n\
          offset:  32768 sectors\n\
          size:    2064384 sectors\n\
          mode:    read/write\n";

    #[test]
    fn mapping_names_match_exactly() {
        assert!(is_mapping_for("sda1", "sda1"));
        assert!(is_mapping_for("luks-sda1", "sda1"));
        assert!(is_mapping_for("luks-0f3c2a6e", "0f3c2a6e"));
        assert!(!is_mapping_for("vg-xsda1", "sda1"));
        assert!(!is_mapping_for("xsda1", "sda1"));
        assert!(!is_mapping_for("luks-sda11", "sda1"));
    }

    #[test]
    fn parses_active_status() {
        let status = parse_cryptsetup_status(Path::new("/dev/sdb1"), ACTIVE);
        assert!(status.is_active);
        assert_eq!(status.mapped_path, Some(PathBuf::from("/dev/mapper/sdb1")));
        assert_eq!(status.backing_device, Some(PathBuf::from("/dev/sdb1")));
        assert_eq!(status.cipher.as_deref(), Some("aes-xts-plain64"));
        assert_eq!(status.key_size, Some(512));
        assert_eq!(status.raw_size, Some(2064384 * 512));
    }

    #[test]
    fn inactive_status_has_no_mapping() {
        let status = parse_cryptsetup_status(
            Path::new("/dev/sdc1"),
            "/dev/mapper/sdc1 is inactive.\n",
        );
        assert!(!status.is_active);
        assert!(status.mapped_path.is_none());
        assert!(status.cipher.is_none());

        let empty = parse_cryptsetup_status(Path::new("/dev/sdc1"), "");
        assert!(!empty.is_active);
    }

    #[test]
    fn raw_device_passes_through_unmapped_paths() {
        assert_eq!(
            raw_device(Path::new("/dev/sda1")).expect("no tool needed"),
            PathBuf::from("/dev/sda1")
        );
    }

    #[test]
    fn detects_grub_signature() {
        let mut sector = vec![0u8; 512];
        sector[0x180..0x184].copy_from_slice(b"GRUB");
        assert!(contains_grub_signature(&sector));
        assert!(!contains_grub_signature(&[0u8; 512]));
    }

    #[test]
    fn reads_first_sector_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("disk.img");
        let mut data = vec![0u8; 2048];
        data[1024..1028].copy_from_slice(b"GRUB");
        std::fs::write(&image, &data).expect("write image");
        assert!(!has_grub(&image).expect("readable"));

        data[100..104].copy_from_slice(b"Grub");
        std::fs::write(&image, &data).expect("write image");
        assert!(has_grub(&image).expect("readable"));
    }
}
