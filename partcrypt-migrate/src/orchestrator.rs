// SPDX-License-Identifier: GPL-3.0-only

//! Per-partition migration state machine
//!
//! `Pending -> BackedUp -> Transformed -> Formatted -> Mounted -> Restored
//! -> Cleaned -> Done`, with `Failed(kind)` reachable from every step. The
//! first fatal failure stops the job; the backup area of the failing
//! partition is never deleted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use partcrypt_sys::SysError;
use partcrypt_types::{
    MigrationErrorKind, MigrationEvent, MigrationFailure, MigrationJob, MigrationMode, Partition,
    PartitionState, Passphrase,
};
use tracing::{debug, error, info, warn};

use crate::backend::MigrationBackend;
use crate::backup::BackupArea;
use crate::channel::ProgressSender;
use crate::passphrase;
use crate::progress::{ProgressTracker, Step};

pub struct Orchestrator<B> {
    backend: B,
    job: MigrationJob,
    sender: ProgressSender,
    tracker: ProgressTracker,
}

impl<B: MigrationBackend> Orchestrator<B> {
    pub fn new(backend: B, job: MigrationJob, sender: ProgressSender) -> Self {
        let tracker = ProgressTracker::new(job.partitions.len());
        Self {
            backend,
            job,
            sender,
            tracker,
        }
    }

    /// Run the job to completion or to its first fatal failure
    ///
    /// Returns the updated partition list, in the caller's order.
    pub fn run(mut self) -> Result<Vec<Partition>, MigrationFailure> {
        info!(
            job = %self.job.id,
            mode = self.job.mode.name(),
            partitions = self.job.partitions.len(),
            "Starting migration job"
        );

        if let Err(failure) = self.validate() {
            error!("Job rejected: {}", failure.message);
            self.fail(None, &failure);
            return Err(failure);
        }

        let partitions = match self.job.mode.clone() {
            MigrationMode::Rekey { new_passphrase } => passphrase::change_passphrases(
                &self.backend,
                &self.job,
                &new_passphrase,
                &mut self.sender,
                &mut self.tracker,
            ),
            MigrationMode::Encrypt => self.migrate_all(true)?,
            MigrationMode::Decrypt => self.migrate_all(false)?,
        };

        let fraction = self.tracker.finish();
        self.sender.progress(fraction);
        info!(job = %self.job.id, "Migration job finished");
        Ok(partitions)
    }

    fn validate(&self) -> Result<(), MigrationFailure> {
        let invalid = |message: String| MigrationFailure::new(MigrationErrorKind::InvalidJob, message);
        let encrypt = matches!(self.job.mode, MigrationMode::Encrypt);
        let rekey = matches!(self.job.mode, MigrationMode::Rekey { .. });

        if let MigrationMode::Rekey { new_passphrase } = &self.job.mode
            && new_passphrase.is_empty()
        {
            return Err(invalid("The new passphrase must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for partition in &self.job.partitions {
            let device = partition.device.display();
            if !seen.insert(partition.device.clone()) {
                return Err(invalid(format!("{device} is listed more than once")));
            }
            if (encrypt || rekey) && self.job.passphrase_for(partition).is_empty() {
                return Err(invalid(format!("No passphrase given for {device}")));
            }
            if encrypt && partition.is_encrypted {
                return Err(invalid(format!("{device} is already encrypted")));
            }
            if !encrypt && !partition.is_encrypted {
                return Err(invalid(format!("{device} is not encrypted")));
            }
            if rekey {
                continue;
            }
            let area = BackupArea::path_for(&self.job.backup_root, &partition.device);
            if area.exists() {
                return Err(invalid(format!(
                    "{} was left by an interrupted migration of {device}. \
                     Restore its data and remove it before trying again.",
                    area.display()
                )));
            }
            if !partition.is_swap() && partition.mount_point.is_some() {
                let on_partition = self
                    .backend
                    .is_on_device(&self.job.backup_root, &partition.device)
                    .map_err(|e| {
                        invalid(format!(
                            "Could not check where the backup location {} is stored: {e}",
                            self.job.backup_root.display()
                        ))
                    })?;
                if on_partition {
                    return Err(invalid(format!(
                        "The backup location {} lies on {device}, which is being migrated",
                        self.job.backup_root.display()
                    )));
                }
            }
        }

        Ok(())
    }

    fn migrate_all(&mut self, encrypt: bool) -> Result<Vec<Partition>, MigrationFailure> {
        match BackupArea::find_interrupted(&self.job.backup_root) {
            Ok(leftovers) => {
                for leftover in leftovers {
                    warn!(
                        "Backup area {} was left behind by an interrupted migration",
                        leftover.display()
                    );
                }
            }
            Err(error) => debug!("Could not scan for leftover backup areas: {}", error),
        }

        let mut partitions = self.job.partitions.clone();
        for index in self.job.processing_order() {
            self.tracker.begin_partition();
            match self.migrate_partition(index, encrypt) {
                Ok(partition) => {
                    let fraction = self.tracker.complete_partition();
                    self.sender.progress(fraction);
                    partitions[index] = partition.clone();
                    self.sender
                        .send(MigrationEvent::PartitionDone { index, partition });
                }
                Err(failure) => {
                    error!(
                        "Migration of {} failed: {}",
                        self.job.partitions[index].device.display(),
                        failure.message
                    );
                    self.fail(Some(index), &failure);
                    return Err(failure);
                }
            }
        }

        Ok(partitions)
    }

    fn migrate_partition(
        &mut self,
        index: usize,
        encrypt: bool,
    ) -> Result<Partition, MigrationFailure> {
        let mut partition = self.job.partitions[index].clone();
        let passphrase = self.job.passphrase_for(&partition).clone();
        self.stage(index, PartitionState::Pending);

        let source = if partition.is_swap() {
            None
        } else {
            match self.mounted_source(&partition)? {
                Some(mount_point) => Some(mount_point),
                None => {
                    self.notice(
                        index,
                        MigrationErrorKind::Skipped,
                        format!(
                            "{} is not mounted and was left unchanged",
                            partition.device.display()
                        ),
                    );
                    self.stage(index, PartitionState::Done);
                    return Ok(partition);
                }
            }
        };

        // Pending -> BackedUp
        let area = BackupArea::create(&self.job.backup_root, &partition.device).map_err(|e| {
            MigrationFailure::new(
                MigrationErrorKind::BackupError,
                format!(
                    "Could not create a backup area in {}: {e}. Select another backup location and try again.",
                    self.job.backup_root.display()
                ),
            )
        })?;
        if let Some(mount_point) = &source {
            info!("Backing up {} to {}", mount_point.display(), area.path().display());
            let copied = self.copy(Step::Backup, mount_point, area.path());
            check_copy(copied).map_err(|(detail, code)| {
                let failure = MigrationFailure::new(
                    MigrationErrorKind::BackupError,
                    format!(
                        "Could not create a backup on {} ({detail}). Select another backup location and try again.",
                        area.path().display()
                    ),
                )
                .with_backup_area(area.path());
                with_code(failure, code)
            })?;
        }
        self.step_done(Step::Backup);
        self.stage(index, PartitionState::BackedUp);

        // BackedUp -> Transformed
        let transformed = if encrypt {
            self.encrypt(&mut partition, &passphrase)
        } else {
            self.decrypt(&mut partition)
        };
        transformed.map_err(|e| {
            let action = if encrypt { "encrypt" } else { "decrypt" };
            with_code(
                MigrationFailure::new(
                    MigrationErrorKind::TransformError,
                    format!(
                        "Could not {action} {}: {e}. Your data is still available in {}.",
                        self.job.partitions[index].device.display(),
                        area.path().display()
                    ),
                )
                .with_backup_area(area.path()),
                e.exit_code(),
            )
        })?;
        self.step_done(Step::Transform);
        self.stage(index, PartitionState::Transformed);

        // Transformed -> Formatted
        self.format(index, &mut partition, area.path())?;
        self.step_done(Step::Format);
        self.stage(index, PartitionState::Formatted);

        if let Some(mount_point) = &source {
            // Formatted -> Mounted
            info!(
                "Mounting {} at {} for restore",
                partition.device.display(),
                mount_point.display()
            );
            self.backend
                .mount(&partition.device, mount_point, &partition.filesystem_type)
                .map_err(|e| {
                    MigrationFailure::new(
                        MigrationErrorKind::RestoreBlocked,
                        format!(
                            "Could not mount {} at {}: {e}. You need to restore your data manually from {}.",
                            partition.device.display(),
                            mount_point.display(),
                            area.path().display()
                        ),
                    )
                    .with_backup_area(area.path())
                })?;
            self.step_done(Step::Mount);
            self.stage(index, PartitionState::Mounted);

            // Mounted -> Restored
            info!("Restoring {} to {}", area.path().display(), mount_point.display());
            let copied = self.copy(Step::Restore, area.path(), mount_point);
            check_copy(copied).map_err(|(detail, code)| {
                let failure = MigrationFailure::new(
                    MigrationErrorKind::RestoreError,
                    format!(
                        "Could not restore the backup ({detail}). You need to restore your data manually from {}.",
                        area.path().display()
                    ),
                )
                .with_backup_area(area.path());
                with_code(failure, code)
            })?;

            if partition.is_removable {
                self.hand_over(index, mount_point);
            }
            self.step_done(Step::Restore);
            self.stage(index, PartitionState::Restored);
        }

        // Restored -> Cleaned -> Done
        let area_path = area.path().to_path_buf();
        if let Err(e) = area.remove() {
            self.notice(
                index,
                MigrationErrorKind::CleanupError,
                format!("Could not remove backup area {}: {e}", area_path.display()),
            );
        }
        self.step_done(Step::Cleanup);
        self.stage(index, PartitionState::Cleaned);
        self.stage(index, PartitionState::Done);

        info!(
            "Finished {} (now {}, encrypted: {})",
            self.job.partitions[index].device.display(),
            partition.device.display(),
            partition.is_encrypted
        );
        Ok(partition)
    }

    /// Mount point to back up, `None` when the partition is not mounted
    fn mounted_source(&self, partition: &Partition) -> Result<Option<PathBuf>, MigrationFailure> {
        let Some(mount_point) = &partition.mount_point else {
            return Ok(None);
        };
        let mounted = self.backend.is_mounted(mount_point).map_err(|e| {
            MigrationFailure::new(
                MigrationErrorKind::BackupError,
                format!("Could not inspect {}: {e}", mount_point.display()),
            )
        })?;
        Ok(mounted.then(|| mount_point.clone()))
    }

    fn encrypt(&self, partition: &mut Partition, passphrase: &Passphrase) -> Result<(), SysError> {
        info!("Encrypting {}", partition.device.display());
        self.backend.unmount(&partition.device)?;
        let mapped = self
            .backend
            .format_and_encrypt(&partition.device, passphrase)?;
        partition.device = mapped;
        partition.is_encrypted = true;
        Ok(())
    }

    fn decrypt(&self, partition: &mut Partition) -> Result<(), SysError> {
        info!("Decrypting {}", partition.device.display());
        let inner = self.backend.filesystem_type(&partition.device)?;
        let raw = self.backend.raw_device(&partition.device)?;

        self.backend.unmount(&partition.device)?;
        self.backend.close(&partition.device)?;

        if let Some(fs_type) = inner.filter(|fs| !fs.is_unknown() && !fs.is_encryption_layer()) {
            partition.filesystem_type = fs_type;
        }
        debug!(
            "Saved filesystem {} and raw device {} of {}",
            partition.filesystem_type,
            raw.display(),
            partition.device.display()
        );
        partition.device = raw;
        partition.is_encrypted = false;
        Ok(())
    }

    fn format(
        &mut self,
        index: usize,
        partition: &mut Partition,
        area: &Path,
    ) -> Result<(), MigrationFailure> {
        let outcome = self
            .backend
            .format(
                &partition.device,
                &partition.filesystem_type,
                partition.label.as_deref(),
            )
            .map_err(|e| {
                let kind = match e {
                    SysError::FilesystemMismatch { .. } => MigrationErrorKind::FormatMismatchError,
                    _ => MigrationErrorKind::FormatError,
                };
                with_code(
                    MigrationFailure::new(
                        kind,
                        format!(
                            "Could not format the device {}: {e}. You need to manually format the device and restore your data from {}.",
                            partition.device.display(),
                            area.display()
                        ),
                    )
                    .with_backup_area(area),
                    e.exit_code(),
                )
            })?;

        if let Some(warning) = outcome.label_warning {
            self.notice(
                index,
                MigrationErrorKind::LabelError,
                format!(
                    "Could not set the label of {}: {warning}",
                    partition.device.display()
                ),
            );
        }

        partition.uuid = match self.backend.uuid(&partition.device) {
            Ok(uuid) => uuid,
            Err(e) => {
                warn!("Could not read UUID of {}: {}", partition.device.display(), e);
                None
            }
        };
        Ok(())
    }

    fn hand_over(&mut self, index: usize, mount_point: &Path) {
        match self.backend.assign_to_logged_user(mount_point) {
            Ok(Some(user)) => info!("{} now belongs to {}", mount_point.display(), user),
            Ok(None) => debug!("No logged-in user for {}", mount_point.display()),
            Err(e) => self.notice(
                index,
                MigrationErrorKind::OwnershipError,
                format!(
                    "Could not hand {} to the logged-in user: {e}",
                    mount_point.display()
                ),
            ),
        }
    }

    fn copy(&mut self, step: Step, source: &Path, destination: &Path) -> Result<i32, SysError> {
        let tracker = &mut self.tracker;
        let sender = &mut self.sender;
        let mut report = |fraction: f64| sender.progress(tracker.within(step, fraction));
        self.backend.copy_tree(source, destination, &mut report)
    }

    fn step_done(&mut self, step: Step) {
        let fraction = self.tracker.complete(step);
        self.sender.progress(fraction);
    }

    fn stage(&mut self, index: usize, state: PartitionState) {
        debug!("Partition {} -> {:?}", index, state);
        self.sender.send(MigrationEvent::Stage { index, state });
    }

    /// Non-fatal problem; processing continues
    fn notice(&mut self, index: usize, code: MigrationErrorKind, message: String) {
        warn!("{}", message);
        self.sender.send(MigrationEvent::Error {
            index: Some(index),
            code,
            message,
            fatal: false,
        });
    }

    fn fail(&mut self, index: Option<usize>, failure: &MigrationFailure) {
        if let Some(index) = index {
            self.stage(index, PartitionState::Failed(failure.kind));
        }
        self.sender.send(MigrationEvent::Error {
            index,
            code: failure.kind,
            message: failure.message.clone(),
            fatal: true,
        });
    }
}

/// Split a copy result into success or a (detail, exit code) pair
fn check_copy(result: Result<i32, SysError>) -> Result<(), (String, Option<i32>)> {
    match result {
        Ok(0) => Ok(()),
        Ok(code) => Err((format!("rsync exit code {code}"), Some(code))),
        Err(e) => Err((e.to_string(), e.exit_code())),
    }
}

fn with_code(failure: MigrationFailure, code: Option<i32>) -> MigrationFailure {
    match code {
        Some(code) => failure.with_exit_code(code),
        None => failure,
    }
}
