// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationErrorKind {
    /// Job rejected before anything was touched
    InvalidJob,

    /// Copying data off the partition failed; nothing was destroyed
    BackupError,

    /// Encrypt/decrypt tool failure; backup intact
    TransformError,

    /// Filesystem creation failed; backup intact
    FormatError,

    /// Filesystem tool reported success but the device holds another type
    FormatMismatchError,

    /// Reformatted device could not be mounted for restore
    RestoreBlocked,

    /// Copying data back failed; backup intact
    RestoreError,

    /// Label could not be applied (non-fatal)
    LabelError,

    /// Ownership could not be handed to the logged-in user (non-fatal)
    OwnershipError,

    /// Backup area could not be removed after a successful restore (non-fatal)
    CleanupError,

    /// Partition was left untouched (non-fatal)
    Skipped,

    /// Passphrase rotation failed for one partition
    PassphraseError,
}

impl MigrationErrorKind {
    /// Stable numeric code reported to callers
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidJob => 100,
            Self::BackupError => 101,
            Self::TransformError => 102,
            Self::FormatError => 105,
            Self::FormatMismatchError => 106,
            Self::RestoreBlocked => 107,
            Self::RestoreError => 108,
            Self::LabelError => 120,
            Self::OwnershipError => 121,
            Self::CleanupError => 122,
            Self::Skipped => 123,
            Self::PassphraseError => 130,
        }
    }

    /// Whether an error of this kind terminates the job
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InvalidJob
                | Self::BackupError
                | Self::TransformError
                | Self::FormatError
                | Self::FormatMismatchError
                | Self::RestoreBlocked
                | Self::RestoreError
        )
    }
}

/// Failure that terminated a migration job
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct MigrationFailure {
    pub kind: MigrationErrorKind,

    /// User-facing message including remediation
    pub message: String,

    /// Backup area still holding the partition data, if one was created
    pub backup_area: Option<PathBuf>,

    /// Exit code of the external tool that failed, when there was one
    pub exit_code: Option<i32>,
}

impl MigrationFailure {
    pub fn new(kind: MigrationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backup_area: None,
            exit_code: None,
        }
    }

    pub fn with_backup_area(mut self, backup_area: impl Into<PathBuf>) -> Self {
        self.backup_area = Some(backup_area.into());
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(MigrationErrorKind::BackupError.code(), 101);
        assert_eq!(MigrationErrorKind::FormatError.code(), 105);
        assert_eq!(MigrationErrorKind::RestoreError.code(), 108);
    }

    #[test]
    fn non_fatal_kinds() {
        assert!(!MigrationErrorKind::LabelError.is_fatal());
        assert!(!MigrationErrorKind::OwnershipError.is_fatal());
        assert!(MigrationErrorKind::RestoreBlocked.is_fatal());
    }
}
