// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use partcrypt_migrate::{BootConfig, DEFAULT_CAPACITY};
use partcrypt_sys::LuksParams;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/partcrypt/config.toml";

const KEY_DERIVATIONS: [&str; 3] = ["pbkdf2", "argon2i", "argon2id"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    pub log_to_disk: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LoggingLevel::Info,
            log_to_disk: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backup_root: PathBuf,
    pub crypttab: PathBuf,
    pub fstab: PathBuf,
    /// Shared key file; an empty string registers partitions without one
    #[serde(deserialize_with = "empty_path_as_none")]
    pub keyfile: Option<PathBuf>,
    pub channel_capacity: usize,
    pub luks: LuksParams,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("/var/backups/partcrypt"),
            crypttab: PathBuf::from("/etc/crypttab"),
            fstab: PathBuf::from("/etc/fstab"),
            keyfile: Some(PathBuf::from("/crypto_keyfile.bin")),
            channel_capacity: DEFAULT_CAPACITY,
            luks: LuksParams::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn empty_path_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(value.filter(|path| !path.as_os_str().is_empty()))
}

impl Config {
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`; a missing file yields the defaults unless it was
    /// named explicitly
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw).with_context(|| format!("in {}", path.display())),
            Err(error) if error.kind() == io::ErrorKind::NotFound && !explicit => {
                Ok(Self::default())
            }
            Err(error) => {
                Err(error).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be at least 1");
        }
        if self.backup_root.as_os_str().is_empty() {
            bail!("backup_root must not be empty");
        }
        if self.luks.key_size == 0 || self.luks.key_size % 8 != 0 {
            bail!(
                "luks.key_size must be a positive multiple of 8, got {}",
                self.luks.key_size
            );
        }
        if self.luks.cipher.trim().is_empty() || self.luks.hash.trim().is_empty() {
            bail!("luks.cipher and luks.hash must not be empty");
        }
        if !KEY_DERIVATIONS.contains(&self.luks.pbkdf.as_str()) {
            bail!(
                "luks.pbkdf must be one of {}, got {:?}",
                KEY_DERIVATIONS.join(", "),
                self.luks.pbkdf
            );
        }
        Ok(())
    }

    pub fn boot_config(&self) -> BootConfig {
        BootConfig {
            crypttab: self.crypttab.clone(),
            fstab: self.fstab.clone(),
            keyfile: self.keyfile.clone(),
        }
    }
}
