// SPDX-License-Identifier: GPL-3.0-only

//! LUKS container management through cryptsetup
//!
//! Passphrases always travel on stdin (`--key-file=-`).

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use partcrypt_types::{Passphrase, device_basename, mapped_path_for};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blkid;
use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};
use crate::mounts;

/// Size of a generated key file in bytes
pub const KEYFILE_SIZE: usize = 4096;

const KEYFILE_MODE: u32 = 0o400;
const WIPE_KEY_ENV: &str = "PARTCRYPT_WIPE_KEY";

/// Parameters for `cryptsetup luksFormat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuksParams {
    pub cipher: String,
    pub key_size: u32,
    pub hash: String,
    /// Key derivation function; pbkdf2 keeps `hash` in use and stays
    /// readable by GRUB
    pub pbkdf: String,
    pub iter_time_ms: u32,
    pub use_random: bool,
}

impl Default for LuksParams {
    fn default() -> Self {
        Self {
            cipher: "aes-xts-plain64".to_string(),
            key_size: 512,
            hash: "sha512".to_string(),
            pbkdf: "pbkdf2".to_string(),
            iter_time_ms: 5000,
            use_random: true,
        }
    }
}

impl LuksParams {
    pub fn format_args(&self, device: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "luksFormat".into(),
            "--batch-mode".into(),
            "--type".into(),
            "luks".into(),
            "--cipher".into(),
            self.cipher.clone().into(),
            "--key-size".into(),
            self.key_size.to_string().into(),
            "--hash".into(),
            self.hash.clone().into(),
            "--pbkdf".into(),
            self.pbkdf.clone().into(),
            "--iter-time".into(),
            self.iter_time_ms.to_string().into(),
        ];
        if self.use_random {
            args.push("--use-random".into());
        }
        args.push("--key-file=-".into());
        args.push(device.into());
        args
    }
}

fn ensure_not_mounted(device: &Path) -> Result<()> {
    if mounts::is_mounted(device)? {
        return Err(SysError::DeviceBusy(device.display().to_string()));
    }
    Ok(())
}

/// Create a LUKS container on `device` and unlock it
///
/// Returns the mapped device path. Destroys all data on `device`.
pub fn format_and_encrypt(
    device: &Path,
    passphrase: &Passphrase,
    params: &LuksParams,
) -> Result<PathBuf> {
    ensure_not_mounted(device)?;

    info!(
        "Creating LUKS container on {} ({}, {} bits)",
        device.display(),
        params.cipher,
        params.key_size
    );
    ToolCommand::new("cryptsetup")
        .args(params.format_args(device))
        .stdin_secret(passphrase.expose().as_bytes())
        .run()?;

    open(device, passphrase)
}

/// Unlock `device`; an already unlocked container returns its mapping
pub fn open(device: &Path, passphrase: &Passphrase) -> Result<PathBuf> {
    if let Some(mapped) = blkid::find_mapped_device(device)? {
        debug!("{} already unlocked at {}", device.display(), mapped.display());
        return Ok(mapped);
    }

    let mapped = mapped_path_for(device);
    ToolCommand::new("cryptsetup")
        .args(["open", "--type", "luks", "--key-file=-"])
        .arg(device)
        .arg(device_basename(device))
        .stdin_secret(passphrase.expose().as_bytes())
        .run()?;

    if !mapped.exists() {
        return Err(SysError::DeviceNotFound(mapped.display().to_string()));
    }

    info!("Unlocked {} at {}", device.display(), mapped.display());
    Ok(mapped)
}

/// Lock the container behind `device` (raw or mapped path)
///
/// A container that is not unlocked is left alone.
pub fn close(device: &Path) -> Result<()> {
    let Some(mapped) = blkid::find_mapped_device(device)? else {
        debug!("{} is not unlocked", device.display());
        return Ok(());
    };
    ensure_not_mounted(&mapped)?;

    ToolCommand::new("cryptsetup")
        .arg("close")
        .arg(device_basename(&mapped))
        .run()?;
    info!("Locked {}", mapped.display());
    Ok(())
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    File::open("/dev/urandom")?.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Write a fresh random key file readable by root only
pub fn write_random_keyfile(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(KEYFILE_MODE)
        .open(path)?;
    file.write_all(&random_bytes(KEYFILE_SIZE)?)?;
    file.sync_all()?;
    fs::set_permissions(path, fs::Permissions::from_mode(KEYFILE_MODE))?;
    Ok(())
}

/// Bind `keyfile` to a key slot of `device`, creating the file if missing
///
/// Any slot the key file already unlocks is removed first.
pub fn create_keyfile(keyfile: &Path, device: &Path, passphrase: &Passphrase) -> Result<()> {
    if !keyfile.exists() {
        info!("Generating key file {}", keyfile.display());
        write_random_keyfile(keyfile)?;
    }

    let removed = ToolCommand::new("cryptsetup")
        .arg("luksRemoveKey")
        .arg(device)
        .arg(keyfile)
        .output()?;
    if !removed.success() {
        debug!(
            "No existing key slot for {} on {}",
            keyfile.display(),
            device.display()
        );
    }

    ToolCommand::new("cryptsetup")
        .args(["luksAddKey", "--key-file=-"])
        .arg(device)
        .arg(keyfile)
        .stdin_secret(passphrase.expose().as_bytes())
        .run()?;

    info!("Added key file {} to {}", keyfile.display(), device.display());
    Ok(())
}

/// Replace the key slot unlocked by `old` with `new`
pub fn change_passphrase(device: &Path, old: &Passphrase, new: &Passphrase) -> Result<()> {
    let mut new_key = tempfile::Builder::new()
        .prefix("partcrypt-")
        .permissions(fs::Permissions::from_mode(0o600))
        .tempfile()?;
    new_key.write_all(new.expose().as_bytes())?;
    new_key.flush()?;

    ToolCommand::new("cryptsetup")
        .args(["luksChangeKey", "--key-file=-"])
        .arg(device)
        .arg(new_key.path())
        .stdin_secret(old.expose().as_bytes())
        .run()?;

    info!("Changed passphrase of {}", device.display());
    Ok(())
}

/// Overwrite `device` with an AES-CTR stream keyed by random bytes
///
/// Unmounts and locks the device first. The stream ends when the device is
/// full, so openssl's exit status is not meaningful.
pub fn wipe(device: &Path) -> Result<()> {
    let raw = blkid::raw_device(device)?;
    if let Some(mapped) = blkid::find_mapped_device(&raw)? {
        mounts::unmount(&mapped)?;
        close(&mapped)?;
    }
    mounts::unmount(&raw)?;

    let key: String = random_bytes(128)?
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();

    let zero = File::open("/dev/zero")?;
    let target = OpenOptions::new().write(true).open(&raw)?;

    warn!("Wiping {}", raw.display());
    let status = Command::new("openssl")
        .args(["enc", "-aes-256-ctr", "-nosalt", "-pass"])
        .arg(format!("env:{WIPE_KEY_ENV}"))
        .env(WIPE_KEY_ENV, key)
        .stdin(Stdio::from(zero))
        .stdout(Stdio::from(target))
        .stderr(Stdio::null())
        .status()
        .map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => SysError::ToolNotFound("openssl".to_string()),
            _ => SysError::Io(error),
        })?;
    debug!("openssl finished with {:?}", status.code());

    info!("Wiped {}", raw.display());
    Ok(())
}
