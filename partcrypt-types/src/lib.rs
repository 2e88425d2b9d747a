// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for partition encryption migration
//!
//! This crate defines the types shared by every layer of the stack:
//!
//! - **partcrypt-sys**: returns [`DeviceStatus`] and reads/writes [`CrypttabRecord`]s
//! - **partcrypt-migrate**: consumes a [`MigrationJob`] and emits [`MigrationEvent`]s
//! - **partcrypt-cli**: builds jobs from probed [`Partition`]s and renders events
//!
//! The orchestrator never persists these records; callers own the partition
//! list and replace their copies from `PartitionDone` events.

pub mod crypttab;
pub mod device;
pub mod error;
pub mod event;
pub mod filesystem;
pub mod job;
pub mod partition;

pub use crypttab::{CRYPTTAB_HEADER, CrypttabRecord};
pub use device::DeviceStatus;
pub use error::{MigrationErrorKind, MigrationFailure};
pub use event::{MigrationEvent, PartitionState};
pub use filesystem::FilesystemType;
pub use job::{JobId, MigrationJob, MigrationMode};
pub use partition::{
    Partition, Passphrase, device_basename, is_mapped_path, mapped_path_for, strip_mapper,
};
