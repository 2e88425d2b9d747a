// SPDX-License-Identifier: GPL-3.0-only

//! Boot-time configuration after a migration: crypttab, key files and fstab
//!
//! Run by the caller once the job has finished, using the partition records
//! from before the job and the records handed back by `PartitionDone`.

use std::path::{Path, PathBuf};

use partcrypt_sys::crypttab::{read_crypttab, write_crypttab_record};
use partcrypt_sys::fstab::{FstabEntry, update_fstab};
use partcrypt_sys::Result;
use partcrypt_types::{CrypttabRecord, Partition, Passphrase, device_basename};
use tracing::{info, warn};

use crate::backend::MigrationBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    pub crypttab: PathBuf,
    pub fstab: PathBuf,
    /// Shared key file unlocking non-root partitions at boot
    pub keyfile: Option<PathBuf>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            crypttab: PathBuf::from("/etc/crypttab"),
            fstab: PathBuf::from("/etc/fstab"),
            keyfile: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootConfigReport {
    pub registered: Vec<CrypttabRecord>,
    pub unregistered: Vec<String>,
    pub fstab_updated: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Sources an fstab line for `partition` may still carry
fn previous_sources(partition: &Partition) -> Vec<String> {
    let mut sources = Vec::new();
    if let Some(uuid) = &partition.uuid {
        sources.push(format!("UUID={uuid}"));
    }
    for device in [&partition.device, &partition.original_device] {
        let device = device.display().to_string();
        if !sources.contains(&device) {
            sources.push(device);
        }
    }
    sources
}

fn register<B: MigrationBackend + ?Sized>(
    backend: &B,
    config: &BootConfig,
    partition: &Partition,
    passphrase: &Passphrase,
    report: &mut BootConfigReport,
) -> Result<()> {
    let raw = backend.raw_device(&partition.device)?;
    let Some(container_uuid) = backend.uuid(&raw)? else {
        report
            .warnings
            .push(format!("{} has no UUID, not added to crypttab", raw.display()));
        return Ok(());
    };

    let mut keyfile = config.keyfile.clone().filter(|_| !partition.is_root());
    if let Some(path) = keyfile.as_deref()
        && let Err(error) = backend.create_keyfile(path, &raw, passphrase)
    {
        report.warnings.push(format!(
            "Could not add key file {} to {}: {error}",
            path.display(),
            raw.display()
        ));
        keyfile = None;
    }

    let record = CrypttabRecord::new(
        device_basename(&raw),
        container_uuid.clone(),
        keyfile,
        partition.is_swap(),
    );
    write_crypttab_record(&config.crypttab, &container_uuid, Some(&record))?;
    info!("Registered {} in {}", raw.display(), config.crypttab.display());
    report.registered.push(record);
    Ok(())
}

/// Drop crypttab records mapping the container that used to sit on `raw`
fn unregister(config: &BootConfig, before: &Partition, raw: &Path) -> Result<Vec<String>> {
    let names = [device_basename(raw), device_basename(&before.device)];
    let mut removed = Vec::new();
    for record in read_crypttab(&config.crypttab)? {
        if names.contains(&record.target_name) {
            write_crypttab_record(&config.crypttab, &record.uuid, None)?;
            info!("Removed {} from {}", record.target_name, config.crypttab.display());
            removed.push(record.target_name);
        }
    }
    Ok(removed)
}

/// Bring crypttab and fstab in line with migrated partitions
///
/// `before[i]` and `after[i]` describe the same partition. Removable media
/// and partitions whose encryption state did not change are left alone.
pub fn apply_boot_configuration<B: MigrationBackend + ?Sized>(
    backend: &B,
    config: &BootConfig,
    before: &[Partition],
    after: &[Partition],
    passphrase: &Passphrase,
) -> Result<BootConfigReport> {
    let mut report = BootConfigReport::default();

    for (before, after) in before.iter().zip(after) {
        if after.is_removable || before.is_encrypted == after.is_encrypted {
            continue;
        }

        if after.is_encrypted {
            let passphrase = after.passphrase.as_ref().unwrap_or(passphrase);
            register(backend, config, after, passphrase, &mut report)?;
        } else {
            report
                .unregistered
                .extend(unregister(config, before, &after.device)?);
        }

        match FstabEntry::for_partition(after) {
            Some(entry) => {
                update_fstab(&config.fstab, &entry, &previous_sources(before))?;
                report.fstab_updated.push(after.device.clone());
            }
            None => {
                warn!("No fstab entry for {}", after.device.display());
                report.warnings.push(format!(
                    "{} has no UUID or mount point, fstab left unchanged",
                    after.device.display()
                ));
            }
        }
    }

    Ok(report)
}
