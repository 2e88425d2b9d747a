// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// Filesystem types a partition can be recreated with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FilesystemType {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    Jfs,
    Vfat,
    Ntfs,
    Exfat,
    Swap,

    /// Encryption layer of a locked container as reported by blkid
    CryptoLuks,

    /// Anything else, kept verbatim (bfs, minix, msdos, ...)
    Other(String),
}

impl FilesystemType {
    /// Parse from blkid `TYPE` output
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "xfs" => Self::Xfs,
            "btrfs" => Self::Btrfs,
            "jfs" => Self::Jfs,
            "vfat" | "fat32" => Self::Vfat,
            "ntfs" => Self::Ntfs,
            "exfat" => Self::Exfat,
            "swap" => Self::Swap,
            "crypto_luks" => Self::CryptoLuks,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name as used by blkid and the `mkfs.<name>` tools
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Jfs => "jfs",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Exfat => "exfat",
            Self::Swap => "swap",
            Self::CryptoLuks => "crypto_LUKS",
            Self::Other(name) => name.as_str(),
        }
    }

    pub fn is_swap(&self) -> bool {
        matches!(self, Self::Swap)
    }

    pub fn is_ext_family(&self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4)
    }

    /// True when blkid reports the encryption layer instead of a filesystem
    pub fn is_encryption_layer(&self) -> bool {
        match self {
            Self::CryptoLuks => true,
            Self::Other(name) => name.contains("crypt"),
            _ => false,
        }
    }

    /// Empty names cannot be formatted
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Other(name) if name.is_empty())
    }
}

impl Default for FilesystemType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for FilesystemType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<FilesystemType> for String {
    fn from(value: FilesystemType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blkid_names() {
        assert_eq!(FilesystemType::parse("ext4"), FilesystemType::Ext4);
        assert_eq!(FilesystemType::parse("crypto_LUKS"), FilesystemType::CryptoLuks);
        assert_eq!(FilesystemType::parse("swap\n"), FilesystemType::Swap);
        assert_eq!(
            FilesystemType::parse("minix"),
            FilesystemType::Other("minix".to_string())
        );
        assert!(FilesystemType::parse("").is_unknown());
    }

    #[test]
    fn encryption_layer_detection() {
        assert!(FilesystemType::CryptoLuks.is_encryption_layer());
        assert!(FilesystemType::parse("crypto_BITLK").is_encryption_layer());
        assert!(!FilesystemType::Ext4.is_encryption_layer());
    }

    #[test]
    fn serializes_as_plain_name() {
        let json = serde_json::to_string(&FilesystemType::Vfat).expect("serialize");
        assert_eq!(json, "\"vfat\"");
        let parsed: FilesystemType = serde_json::from_str("\"xfs\"").expect("deserialize");
        assert_eq!(parsed, FilesystemType::Xfs);
    }
}
