// SPDX-License-Identifier: GPL-3.0-only

//! `/etc/crypttab` maintenance

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use partcrypt_types::{CRYPTTAB_HEADER, CrypttabRecord, FilesystemType, device_basename};
use tracing::info;

use crate::blkid;
use crate::error::{Result, SysError};

const TABLE_MODE: u32 = 0o644;

/// Replace a system table through a temporary file in the same directory
pub(crate) fn write_table(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mode = fs::metadata(path)
        .map(|metadata| metadata.permissions().mode())
        .unwrap_or(TABLE_MODE);

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;
    temp.persist(path).map_err(|error| SysError::Io(error.error))?;
    Ok(())
}

fn references_uuid(line: &str, uuid: &str) -> bool {
    let line = line.trim();
    if line.starts_with('#') {
        return false;
    }
    line.split_whitespace()
        .nth(1)
        .and_then(|source| source.strip_prefix("UUID="))
        .is_some_and(|source| source == uuid)
}

/// Replace the record for `uuid` in crypttab `content`, append it when
/// absent, or drop every line for `uuid` when `record` is `None`
pub fn upsert_record(content: &str, uuid: &str, record: Option<&CrypttabRecord>) -> String {
    let mut lines = Vec::new();
    let mut written = false;

    for line in content.lines() {
        if !references_uuid(line, uuid) {
            lines.push(line.to_string());
            continue;
        }
        if let Some(record) = record
            && !written
        {
            lines.push(record.to_line());
            written = true;
        }
    }

    if let Some(record) = record
        && !written
    {
        lines.push(record.to_line());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Records in `path`; a missing file has none
pub fn read_crypttab(path: &Path) -> Result<Vec<CrypttabRecord>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().filter_map(CrypttabRecord::parse_line).collect()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

/// Upsert or remove the record for `uuid` in the file at `path`
///
/// A missing file is created with the standard header.
pub fn write_crypttab_record(
    path: &Path,
    uuid: &str,
    record: Option<&CrypttabRecord>,
) -> Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            if record.is_none() {
                return Ok(());
            }
            format!("{CRYPTTAB_HEADER}\n")
        }
        Err(error) => return Err(error.into()),
    };

    write_table(path, &upsert_record(&content, uuid, record))
}

/// Register (or with `remove`, unregister) the encrypted `device` in crypttab
///
/// The record is keyed by the UUID of the raw device and named after its
/// basename. Returns the record written, if any.
pub fn write_crypttab(
    device: &Path,
    filesystem_type: &FilesystemType,
    crypttab: &Path,
    keyfile: Option<&Path>,
    remove: bool,
) -> Result<Option<CrypttabRecord>> {
    let raw = blkid::raw_device(device)?;
    let uuid = blkid::uuid(&raw)?
        .ok_or_else(|| SysError::DeviceNotFound(format!("no UUID for {}", raw.display())))?;

    if remove {
        write_crypttab_record(crypttab, &uuid, None)?;
        info!("Removed {} from {}", raw.display(), crypttab.display());
        return Ok(None);
    }

    let record = CrypttabRecord::new(
        device_basename(&raw),
        uuid.clone(),
        keyfile.map(Path::to_path_buf),
        filesystem_type.is_swap(),
    );
    write_crypttab_record(crypttab, &uuid, Some(&record))?;
    info!("Registered {} in {}", raw.display(), crypttab.display());
    Ok(Some(record))
}
