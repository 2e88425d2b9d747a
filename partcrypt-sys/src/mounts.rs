// SPDX-License-Identifier: GPL-3.0-only

//! Mount table inspection and disk management (mount/umount/swapoff)

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use partcrypt_types::FilesystemType;
use tracing::{debug, info, warn};

use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

pub fn parse_proc_mounts(input: &str) -> Vec<MountEntry> {
    input
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: PathBuf::from(unescape_mount_field(target)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Device paths of active swap areas from `/proc/swaps`
pub fn parse_proc_swaps(input: &str) -> Vec<PathBuf> {
    input
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(|device| PathBuf::from(unescape_mount_field(device)))
        .collect()
}

fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..=index + 3]
                .iter()
                .all(|byte| (b'0'..=b'7').contains(byte))
        {
            let value = (bytes[index + 1] - b'0') * 64
                + (bytes[index + 2] - b'0') * 8
                + (bytes[index + 3] - b'0');
            out.push(value);
            index += 4;
            continue;
        }

        out.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

pub fn read_mounts() -> Result<Vec<MountEntry>> {
    Ok(parse_proc_mounts(&fs::read_to_string("/proc/mounts")?))
}

pub fn read_swaps() -> Result<Vec<PathBuf>> {
    Ok(parse_proc_swaps(&fs::read_to_string("/proc/swaps")?))
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn entry_matches(entry: &MountEntry, path: &Path) -> bool {
    same_path(Path::new(&entry.source), path) || entry.target == path
}

/// True when `path` is a mounted device, a mount point, or an active swap device
pub fn is_mounted(path: &Path) -> Result<bool> {
    if read_mounts()?.iter().any(|entry| entry_matches(entry, path)) {
        return Ok(true);
    }
    is_active_swap(path)
}

pub fn is_active_swap(device: &Path) -> Result<bool> {
    Ok(read_swaps()?.iter().any(|swap| same_path(swap, device)))
}

/// Mount points where `device` is currently mounted
pub fn mount_points(device: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_mounts()?
        .into_iter()
        .filter(|entry| same_path(Path::new(&entry.source), device))
        .map(|entry| entry.target)
        .collect())
}

/// `path` itself, or its closest ancestor that exists
fn existing_ancestor(path: &Path) -> io::Result<PathBuf> {
    let mut current = path;
    loop {
        match fs::canonicalize(current) {
            Ok(resolved) => return Ok(resolved),
            Err(error) if error.kind() == io::ErrorKind::NotFound => match current.parent() {
                Some(parent) => current = parent,
                None => return Err(error),
            },
            Err(error) => return Err(error),
        }
    }
}

/// Mount entry whose target holds `path`: the longest matching mount point
pub fn holding_mount<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    entries
        .iter()
        .filter(|entry| path.starts_with(&entry.target))
        .max_by_key(|entry| entry.target.components().count())
}

/// True when `path`, or the directory it would be created in, is stored on
/// the filesystem of block device `device`
pub fn is_on_device(path: &Path, device: &Path) -> Result<bool> {
    let resolved = existing_ancestor(path)?;
    if fs::metadata(&resolved)?.dev() == fs::metadata(device)?.rdev() {
        return Ok(true);
    }

    // btrfs and other filesystems report anonymous st_dev values
    let mounts = read_mounts()?;
    Ok(holding_mount(&mounts, &resolved)
        .is_some_and(|entry| same_path(Path::new(&entry.source), device)))
}

/// Mount `device` at `mount_point`, creating the directory when needed
pub fn mount(
    device: &Path,
    mount_point: &Path,
    filesystem_type: Option<&FilesystemType>,
) -> Result<PathBuf> {
    if mount_points(device)?.iter().any(|target| target == mount_point) {
        debug!("{} already mounted at {}", device.display(), mount_point.display());
        return Ok(mount_point.to_path_buf());
    }

    fs::create_dir_all(mount_point)?;

    let mut command = ToolCommand::new("mount");
    if let Some(fs_type) = filesystem_type.filter(|fs_type| !fs_type.is_unknown()) {
        command = command.args(["-t", fs_type.as_str()]);
    }
    command.arg(device).arg(mount_point).run()?;

    if !mount_points(device)?.iter().any(|target| target == mount_point) {
        return Err(SysError::OperationFailed(format!(
            "{} is not mounted at {} after mount",
            device.display(),
            mount_point.display()
        )));
    }

    info!("Mounted {} at {}", device.display(), mount_point.display());
    Ok(mount_point.to_path_buf())
}

/// Deactivate swap or unmount every mount of `device`
///
/// Falls back to a forced unmount; a device that stays mounted is busy.
pub fn unmount(device: &Path) -> Result<()> {
    if is_active_swap(device)? {
        info!("Disabling swap on {}", device.display());
        ToolCommand::new("swapoff").arg(device).run()?;
    }

    if !is_mounted(device)? {
        return Ok(());
    }

    let output = ToolCommand::new("umount").arg(device).output()?;
    if !output.success() {
        warn!(
            "umount {} failed, retrying with --force: {}",
            device.display(),
            output.stderr.trim()
        );
        let forced = ToolCommand::new("umount").arg("-f").arg(device).output()?;
        if !forced.success() {
            debug!("forced umount failed: {}", forced.stderr.trim());
        }
    }

    if is_mounted(device)? {
        return Err(SysError::DeviceBusy(device.display().to_string()));
    }

    info!("Unmounted {}", device.display());
    Ok(())
}
