// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::{MigrationErrorKind, Partition};

/// Per-partition pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum PartitionState {
    Pending,
    BackedUp,
    Transformed,
    Formatted,
    Mounted,
    Restored,
    Cleaned,
    Done,
    Failed(MigrationErrorKind),
}

impl PartitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

/// Event delivered on the progress channel, in production order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum MigrationEvent {
    /// Overall job fraction in `[0.0, 1.0]`, non-decreasing; `1.0` only once
    /// the whole job has completed
    Progress { fraction: f64 },

    /// Partition at `index` (in the caller's list) entered `state`
    Stage { index: usize, state: PartitionState },

    /// Partition at `index` is finished; replaces the caller's copy
    PartitionDone { index: usize, partition: Partition },

    Error {
        index: Option<usize>,
        code: MigrationErrorKind,
        message: String,
        fatal: bool,
    },
}

impl MigrationEvent {
    pub fn is_job_done(&self) -> bool {
        matches!(self, Self::Progress { fraction } if *fraction >= 1.0)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Error { fatal: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FilesystemType;

    #[test]
    fn partition_done_roundtrips() {
        let event = MigrationEvent::PartitionDone {
            index: 2,
            partition: Partition::new("/dev/mapper/sdb1", FilesystemType::Ext4),
        };
        let json = serde_json::to_string(&event).expect("serialize event");
        let parsed: MigrationEvent = serde_json::from_str(&json).expect("deserialize event");
        assert_eq!(parsed, event);
    }

    #[test]
    fn job_done_is_full_progress_only() {
        assert!(MigrationEvent::Progress { fraction: 1.0 }.is_job_done());
        assert!(!MigrationEvent::Progress { fraction: 0.99 }.is_job_done());
        assert!(PartitionState::Failed(MigrationErrorKind::RestoreError).is_terminal());
    }
}
