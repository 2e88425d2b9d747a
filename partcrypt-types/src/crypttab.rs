// SPDX-License-Identifier: GPL-3.0-only

//! Crypttab records
//!
//! One record per encrypted partition that unlocks at boot:
//! `<target name>\tUUID=<uuid>\t<key file|none>\t<options>`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Header written to a freshly created crypttab
pub const CRYPTTAB_HEADER: &str = "# <target name>\t<source device>\t<key file>\t<options>";

const LUKS_OPTIONS: [&str; 2] = ["luks", "timeout=60"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrypttabRecord {
    /// Mapper name the volume is unlocked as
    pub target_name: String,

    /// UUID of the encrypted (raw) device
    pub uuid: String,

    /// Key file unlocking the volume, `None` renders as `none`
    pub key_file: Option<PathBuf>,

    pub options: Vec<String>,
}

impl CrypttabRecord {
    /// Record with the standard `luks,timeout=60` options, prefixed by `swap`
    /// for swap partitions
    pub fn new(
        target_name: impl Into<String>,
        uuid: impl Into<String>,
        key_file: Option<PathBuf>,
        swap: bool,
    ) -> Self {
        let mut options = Vec::with_capacity(3);
        if swap {
            options.push("swap".to_string());
        }
        options.extend(LUKS_OPTIONS.iter().map(|option| option.to_string()));

        Self {
            target_name: target_name.into(),
            uuid: uuid.into(),
            key_file,
            options,
        }
    }

    /// Source field as written in the file
    pub fn source(&self) -> String {
        format!("UUID={}", self.uuid)
    }

    pub fn is_swap(&self) -> bool {
        self.options.iter().any(|option| option == "swap")
    }

    pub fn to_line(&self) -> String {
        let key_file = self
            .key_file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string());

        format!(
            "{}\t{}\t{}\t{}",
            self.target_name,
            self.source(),
            key_file,
            self.options.join(",")
        )
    }

    /// Parse a single crypttab line; comments, blank lines and records whose
    /// source is not a `UUID=` spec yield `None`
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split_whitespace();
        let target_name = fields.next()?;
        let uuid = fields.next()?.strip_prefix("UUID=")?;
        let key_file = match fields.next() {
            None | Some("none") | Some("-") => None,
            Some(path) => Some(PathBuf::from(path)),
        };
        let options = fields
            .next()
            .map(|options| {
                options
                    .split(',')
                    .filter(|option| !option.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            target_name: target_name.to_string(),
            uuid: uuid.to_string(),
            key_file,
            options,
        })
    }
}
