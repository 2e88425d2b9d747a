// SPDX-License-Identifier: GPL-3.0-only

//! Partition record - the entity mutated by a migration
//!
//! A `Partition` is handed to the orchestrator at job start and handed back,
//! updated, once the partition has been fully migrated.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::FilesystemType;

const MAPPER_DIR: &str = "/dev/mapper";

/// Secret used to unlock an encrypted container
///
/// Never serialized and never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// A partition taking part in a migration job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Block device path usable by the current pipeline stage
    /// (raw device, or the mapped device once unlocked)
    pub device: PathBuf,

    /// Device path as first seen by the caller, used for matching
    /// crypttab/fstab entries
    pub original_device: PathBuf,

    /// Filesystem type; authoritative after formatting
    pub filesystem_type: FilesystemType,

    /// Filesystem label
    pub label: Option<String>,

    /// Filesystem UUID, recomputed after formatting
    pub uuid: Option<String>,

    /// Where the filesystem is mounted, `None` when unmounted
    pub mount_point: Option<PathBuf>,

    /// Whether the partition sits behind an encryption layer
    pub is_encrypted: bool,

    /// Per-partition passphrase overriding the job passphrase
    #[serde(skip)]
    pub passphrase: Option<Passphrase>,

    /// Partition lives on removable media (pen drive)
    pub is_removable: bool,

    /// A boot loader was found in the first sector
    pub has_bootloader: bool,
}

impl Partition {
    pub fn new(device: impl Into<PathBuf>, filesystem_type: FilesystemType) -> Self {
        let device = device.into();
        Self {
            original_device: device.clone(),
            device,
            filesystem_type,
            label: None,
            uuid: None,
            mount_point: None,
            is_encrypted: false,
            passphrase: None,
            is_removable: false,
            has_bootloader: false,
        }
    }

    pub fn is_swap(&self) -> bool {
        self.filesystem_type.is_swap()
    }

    pub fn is_root(&self) -> bool {
        self.mount_point.as_deref() == Some(Path::new("/"))
    }

    /// Last path component of the current device (`sda1` for `/dev/mapper/sda1`)
    pub fn device_name(&self) -> String {
        device_basename(&self.device)
    }

    /// True when `device` points into the device-mapper namespace
    pub fn is_mapped(&self) -> bool {
        is_mapped_path(&self.device)
    }
}

/// Last path component of a device path
pub fn device_basename(device: &Path) -> String {
    device
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// True when the path lives under `/dev/mapper`
pub fn is_mapped_path(device: &Path) -> bool {
    device.starts_with(MAPPER_DIR)
}

/// Mapped device path the encryption layer exposes for `device`
pub fn mapped_path_for(device: &Path) -> PathBuf {
    Path::new(MAPPER_DIR).join(device_basename(device))
}

/// Strip the `/mapper` component: `/dev/mapper/sda1` becomes `/dev/sda1`
pub fn strip_mapper(device: &Path) -> PathBuf {
    match device.strip_prefix(MAPPER_DIR) {
        Ok(rest) => Path::new("/dev").join(rest),
        Err(_) => device.to_path_buf(),
    }
}
