// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Partition, Passphrase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationMode {
    Encrypt,
    Decrypt,
    /// Rotate the passphrase; the job passphrase is the current one
    Rekey { new_passphrase: Passphrase },
}

impl MigrationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Rekey { .. } => "rekey",
        }
    }
}

/// One run of the migration engine
#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub id: JobId,
    pub partitions: Vec<Partition>,
    pub mode: MigrationMode,
    pub passphrase: Passphrase,

    /// Root under which `luks_bak/<device>` backup areas are created
    pub backup_root: PathBuf,
}

impl MigrationJob {
    pub fn new(
        partitions: Vec<Partition>,
        mode: MigrationMode,
        passphrase: Passphrase,
        backup_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: JobId::new(),
            partitions,
            mode,
            passphrase,
            backup_root: backup_root.into(),
        }
    }

    /// Indices into `partitions` in processing order: every non-swap
    /// partition in caller order, then every swap partition
    pub fn processing_order(&self) -> Vec<usize> {
        let (mut order, swap): (Vec<usize>, Vec<usize>) =
            (0..self.partitions.len()).partition(|&index| !self.partitions[index].is_swap());
        order.extend(swap);
        order
    }

    /// Passphrase for one partition, falling back to the job passphrase
    pub fn passphrase_for<'a>(&'a self, partition: &'a Partition) -> &'a Passphrase {
        partition.passphrase.as_ref().unwrap_or(&self.passphrase)
    }
}
