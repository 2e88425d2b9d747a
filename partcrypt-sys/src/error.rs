// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("Command failed: {command} (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Filesystem mismatch on {device}: expected {expected}, found {found}")]
    FilesystemMismatch {
        device: String,
        expected: String,
        found: String,
    },

    #[error("No filesystem type for {0}")]
    MissingFilesystemType(String),

    #[error("Invalid content in {path:?}: {reason}")]
    InvalidTable { path: PathBuf, reason: String },

    #[error("Failed to parse {tool} output: {reason}")]
    Parse { tool: String, reason: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl SysError {
    /// Exit code of the failed external command, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
