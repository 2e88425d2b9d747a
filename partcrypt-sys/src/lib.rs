// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for partition encryption migration
//!
//! This crate wraps the external tools the migration engine depends on:
//! - `blkid`/`lsblk`/`cryptsetup status` for device state
//! - `cryptsetup` for LUKS containers and key slots
//! - `mkfs.*` and label tools for filesystem creation
//! - `rsync` for backup and restore of directory trees
//! - `mount`/`umount`/`swapoff` for disk management
//! - `/etc/crypttab` and `/etc/fstab` maintenance
//!
//! These operations require root privileges and are blocking.

pub mod blkid;
pub mod cmd;
pub mod crypttab;
pub mod error;
pub mod fstab;
pub mod luks;
pub mod mkfs;
pub mod mounts;
pub mod probe;
pub mod progress;
pub mod rsync;
pub mod unix_user;

pub use blkid::{device_from_uuid, filesystem_type, is_encrypted, label, raw_device, status, uuid};
pub use crypttab::{read_crypttab, write_crypttab, write_crypttab_record};
pub use error::{Result, SysError};
pub use fstab::{FstabEntry, read_fstab, update_fstab};
pub use luks::{LuksParams, change_passphrase, close, create_keyfile, format_and_encrypt, open, wipe};
pub use mkfs::{FormatOutcome, format};
pub use mounts::{is_mounted, is_on_device, mount, unmount};
pub use probe::probe_partition;
pub use rsync::copy_tree;
pub use unix_user::assign_to_logged_user;
