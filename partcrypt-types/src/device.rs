// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::FilesystemType;

/// Encryption/mount/filesystem state of a block device
///
/// A device without an encryption layer reports `is_active == false` and no
/// mapped path. A locked container reports the encryption layer itself as its
/// filesystem type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device the status was queried for
    pub device: PathBuf,

    /// Encryption layer is unlocked and mapped
    pub is_active: bool,

    /// Mapped (decrypted) device, when unlocked
    pub mapped_path: Option<PathBuf>,

    /// Raw device backing the mapping, when unlocked
    pub backing_device: Option<PathBuf>,

    /// Cipher specification (e.g. "aes-xts-plain64")
    pub cipher: Option<String>,

    /// Key size in bits
    pub key_size: Option<u32>,

    /// Inner filesystem when unlocked, encryption layer type otherwise
    pub filesystem_type: FilesystemType,

    /// Size of the mapped payload in bytes
    pub raw_size: Option<u64>,
}
