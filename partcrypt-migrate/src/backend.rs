// SPDX-License-Identifier: GPL-3.0-only

//! Seam between the migration state machine and the host system

use std::path::{Path, PathBuf};

use partcrypt_sys::luks::LuksParams;
use partcrypt_sys::{FormatOutcome, Result};
use partcrypt_types::{FilesystemType, Passphrase};

/// Device, encryption and copy operations the orchestrator depends on
pub trait MigrationBackend: Send {
    /// True when `path` is a mounted device, a mount point or active swap
    fn is_mounted(&self, path: &Path) -> Result<bool>;
    fn unmount(&self, device: &Path) -> Result<()>;
    /// True when `path` is stored on the filesystem of `device`
    fn is_on_device(&self, path: &Path, device: &Path) -> Result<bool>;
    fn mount(&self, device: &Path, mount_point: &Path, filesystem_type: &FilesystemType)
    -> Result<()>;

    fn filesystem_type(&self, device: &Path) -> Result<Option<FilesystemType>>;
    fn uuid(&self, device: &Path) -> Result<Option<String>>;
    fn raw_device(&self, device: &Path) -> Result<PathBuf>;

    fn format_and_encrypt(&self, device: &Path, passphrase: &Passphrase) -> Result<PathBuf>;
    fn close(&self, device: &Path) -> Result<()>;
    fn change_passphrase(&self, device: &Path, old: &Passphrase, new: &Passphrase) -> Result<()>;
    fn create_keyfile(&self, keyfile: &Path, device: &Path, passphrase: &Passphrase)
    -> Result<()>;

    fn format(
        &self,
        device: &Path,
        filesystem_type: &FilesystemType,
        label: Option<&str>,
    ) -> Result<FormatOutcome>;

    /// Copy the contents of `source` into `destination`, returning the copy
    /// tool's exit code
    fn copy_tree(
        &self,
        source: &Path,
        destination: &Path,
        progress: &mut dyn FnMut(f64),
    ) -> Result<i32>;

    /// Hand `path` to the logged-in user; `None` when nobody is logged in
    fn assign_to_logged_user(&self, path: &Path) -> Result<Option<String>>;
}

/// Backend running the real system tools
#[derive(Debug, Clone, Default)]
pub struct SystemBackend {
    luks: LuksParams,
}

impl SystemBackend {
    pub fn new(luks: LuksParams) -> Self {
        Self { luks }
    }
}

impl MigrationBackend for SystemBackend {
    fn is_mounted(&self, path: &Path) -> Result<bool> {
        partcrypt_sys::is_mounted(path)
    }

    fn unmount(&self, device: &Path) -> Result<()> {
        partcrypt_sys::unmount(device)
    }

    fn is_on_device(&self, path: &Path, device: &Path) -> Result<bool> {
        partcrypt_sys::is_on_device(path, device)
    }

    fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        filesystem_type: &FilesystemType,
    ) -> Result<()> {
        partcrypt_sys::mount(device, mount_point, Some(filesystem_type)).map(|_| ())
    }

    fn filesystem_type(&self, device: &Path) -> Result<Option<FilesystemType>> {
        partcrypt_sys::filesystem_type(device)
    }

    fn uuid(&self, device: &Path) -> Result<Option<String>> {
        partcrypt_sys::uuid(device)
    }

    fn raw_device(&self, device: &Path) -> Result<PathBuf> {
        partcrypt_sys::raw_device(device)
    }

    fn format_and_encrypt(&self, device: &Path, passphrase: &Passphrase) -> Result<PathBuf> {
        partcrypt_sys::format_and_encrypt(device, passphrase, &self.luks)
    }

    fn close(&self, device: &Path) -> Result<()> {
        partcrypt_sys::close(device)
    }

    fn change_passphrase(&self, device: &Path, old: &Passphrase, new: &Passphrase) -> Result<()> {
        partcrypt_sys::change_passphrase(device, old, new)
    }

    fn create_keyfile(
        &self,
        keyfile: &Path,
        device: &Path,
        passphrase: &Passphrase,
    ) -> Result<()> {
        partcrypt_sys::create_keyfile(keyfile, device, passphrase)
    }

    fn format(
        &self,
        device: &Path,
        filesystem_type: &FilesystemType,
        label: Option<&str>,
    ) -> Result<FormatOutcome> {
        partcrypt_sys::format(device, filesystem_type, label)
    }

    fn copy_tree(
        &self,
        source: &Path,
        destination: &Path,
        progress: &mut dyn FnMut(f64),
    ) -> Result<i32> {
        partcrypt_sys::copy_tree(source, destination, progress)
    }

    fn assign_to_logged_user(&self, path: &Path) -> Result<Option<String>> {
        partcrypt_sys::assign_to_logged_user(path)
    }
}
