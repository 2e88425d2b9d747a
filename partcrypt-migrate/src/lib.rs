// SPDX-License-Identifier: GPL-3.0-only

//! Partition encryption/decryption migration engine
//!
//! A [`MigrationJob`] runs on one background thread. Partitions are handled
//! strictly one after another, swap last, and every step reports through a
//! bounded [`ProgressReceiver`]. The engine never persists partition state;
//! callers replace their records from `PartitionDone` events and run
//! [`apply_boot_configuration`] themselves afterwards.

pub mod backend;
pub mod backup;
pub mod boot_config;
pub mod channel;
pub mod orchestrator;
mod passphrase;
pub mod progress;

use std::io;
use std::thread::{self, JoinHandle};

use partcrypt_types::{MigrationErrorKind, MigrationFailure, MigrationJob, Partition};

pub use backend::{MigrationBackend, SystemBackend};
pub use backup::BackupArea;
pub use boot_config::{BootConfig, BootConfigReport, apply_boot_configuration};
pub use channel::{DEFAULT_CAPACITY, ProgressReceiver, ProgressSender, progress_channel};
pub use orchestrator::Orchestrator;

pub type JobResult = Result<Vec<Partition>, MigrationFailure>;

/// A job running on its worker thread
pub struct JobHandle {
    events: ProgressReceiver,
    worker: JoinHandle<JobResult>,
}

impl JobHandle {
    pub fn events(&self) -> &ProgressReceiver {
        &self.events
    }

    /// Wait for the worker; undelivered events are discarded
    pub fn join(self) -> JobResult {
        let JobHandle { events, worker } = self;
        drop(events);
        worker.join().unwrap_or_else(|_| {
            Err(MigrationFailure::new(
                MigrationErrorKind::TransformError,
                "The migration worker panicked; check the backup areas before retrying",
            ))
        })
    }
}

/// Run `job` on the current thread
pub fn run_job<B: MigrationBackend>(
    backend: B,
    job: MigrationJob,
    sender: ProgressSender,
) -> JobResult {
    Orchestrator::new(backend, job, sender).run()
}

/// Start `job` on a dedicated worker thread
pub fn spawn_job<B>(backend: B, job: MigrationJob, capacity: usize) -> io::Result<JobHandle>
where
    B: MigrationBackend + 'static,
{
    let (sender, events) = progress_channel(capacity);
    let worker = thread::Builder::new()
        .name(format!("partcrypt-{}", job.mode.name()))
        .spawn(move || run_job(backend, job, sender))?;
    Ok(JobHandle { events, worker })
}
