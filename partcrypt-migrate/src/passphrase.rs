// SPDX-License-Identifier: GPL-3.0-only

//! Passphrase rotation: a reduced pipeline with no backup, format or restore
//!
//! Failures are reported per partition and never stop the job.

use partcrypt_types::{
    MigrationErrorKind, MigrationEvent, MigrationJob, Partition, PartitionState, Passphrase,
};
use tracing::{info, warn};

use crate::backend::MigrationBackend;
use crate::channel::ProgressSender;
use crate::progress::ProgressTracker;

pub(crate) fn change_passphrases<B: MigrationBackend>(
    backend: &B,
    job: &MigrationJob,
    new_passphrase: &Passphrase,
    sender: &mut ProgressSender,
    tracker: &mut ProgressTracker,
) -> Vec<Partition> {
    for (index, partition) in job.partitions.iter().enumerate() {
        tracker.begin_partition();
        sender.send(MigrationEvent::Stage {
            index,
            state: PartitionState::Pending,
        });

        let old_passphrase = job.passphrase_for(partition);
        let changed = backend
            .raw_device(&partition.device)
            .and_then(|raw| backend.change_passphrase(&raw, old_passphrase, new_passphrase));

        match changed {
            Ok(()) => {
                info!("Changed passphrase of {}", partition.device.display());
                for state in [PartitionState::Transformed, PartitionState::Done] {
                    sender.send(MigrationEvent::Stage { index, state });
                }
                sender.progress(tracker.complete_partition());
                sender.send(MigrationEvent::PartitionDone {
                    index,
                    partition: partition.clone(),
                });
            }
            Err(error) => {
                let message = format!(
                    "Could not change the passphrase of {}: {error}",
                    partition.device.display()
                );
                warn!("{}", message);
                sender.send(MigrationEvent::Stage {
                    index,
                    state: PartitionState::Failed(MigrationErrorKind::PassphraseError),
                });
                sender.send(MigrationEvent::Error {
                    index: Some(index),
                    code: MigrationErrorKind::PassphraseError,
                    message,
                    fatal: false,
                });
                sender.progress(tracker.complete_partition());
            }
        }
    }

    job.partitions.clone()
}
