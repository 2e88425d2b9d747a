// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use partcrypt_migrate::{BackupArea, SystemBackend, apply_boot_configuration, spawn_job};
use partcrypt_sys::probe_partition;
use partcrypt_types::{
    FilesystemType, MigrationErrorKind, MigrationJob, MigrationMode, Partition, Passphrase,
};
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::prompt::{self, NEW_PASSPHRASE_ENV, PASSPHRASE_ENV};
use crate::render::Reporter;

const NOT_ABORTABLE: &str = "This operation cannot be aborted once started. \
     Do not power off the machine until it has finished.";

fn require_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } != 0 {
        bail!("partcrypt must be run as root");
    }
    Ok(())
}

fn probe_all(devices: &[PathBuf]) -> Result<Vec<Partition>> {
    devices
        .iter()
        .map(|device| {
            probe_partition(device).with_context(|| format!("failed to probe {}", device.display()))
        })
        .collect()
}

fn print_plan(action: &str, partitions: &[Partition]) {
    println!("Partitions to {action}:");
    for partition in partitions {
        let mount_point = partition
            .mount_point
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "not mounted".to_string());
        println!(
            "  {} ({}, {})",
            partition.device.display(),
            partition.filesystem_type,
            mount_point
        );
    }
    eprintln!("{NOT_ABORTABLE}");
}

/// Run `job` on a worker thread and render its events until it finishes
fn drive(
    backend: SystemBackend,
    job: MigrationJob,
    capacity: usize,
) -> Result<(Vec<Partition>, Reporter<io::Stdout>)> {
    let mut reporter = Reporter::new(io::stdout(), &job.partitions);
    let handle = spawn_job(backend, job, capacity).context("failed to start the migration")?;

    for event in handle.events().iter() {
        reporter.handle(&event)?;
    }

    match handle.join() {
        Ok(partitions) => Ok((partitions, reporter)),
        Err(failure) => {
            let mut message = failure.message.clone();
            if let Some(area) = &failure.backup_area {
                message.push_str(&format!("\nYour data is kept in {}", area.display()));
            }
            if let Some(code) = failure.exit_code {
                message.push_str(&format!("\nThe failing tool exited with code {code}"));
            }
            bail!("{message}");
        }
    }
}

pub fn migrate(
    config: &Config,
    devices: &[PathBuf],
    encrypt: bool,
    skip_boot_config: bool,
) -> Result<()> {
    require_root()?;
    let before = probe_all(devices)?;
    print_plan(if encrypt { "encrypt" } else { "decrypt" }, &before);

    // Decryption works on unlocked devices and needs no passphrase.
    let (mode, passphrase) = if encrypt {
        (MigrationMode::Encrypt, prompt::new(PASSPHRASE_ENV, "Passphrase")?)
    } else {
        (MigrationMode::Decrypt, Passphrase::new(""))
    };

    let backend = SystemBackend::new(config.luks.clone());
    let job = MigrationJob::new(
        before.clone(),
        mode,
        passphrase.clone(),
        &config.backup_root,
    );
    info!("Starting {} job {}", job.mode.name(), job.id);

    let (after, _) = drive(backend.clone(), job, config.channel_capacity)?;

    if skip_boot_config {
        println!("Boot configuration left unchanged");
        return Ok(());
    }

    let report = apply_boot_configuration(
        &backend,
        &config.boot_config(),
        &before,
        &after,
        &passphrase,
    )
    .context("the partitions were migrated but the boot configuration could not be updated")?;

    for record in &report.registered {
        println!("Registered {} in {}", record.target_name, config.crypttab.display());
    }
    for name in &report.unregistered {
        println!("Removed {name} from {}", config.crypttab.display());
    }
    for mount_point in &report.fstab_updated {
        println!("Updated {} in {}", mount_point.display(), config.fstab.display());
    }
    for warning in &report.warnings {
        warn!("{warning}");
    }
    Ok(())
}

pub fn change_passphrase(config: &Config, devices: &[PathBuf]) -> Result<()> {
    require_root()?;
    let partitions = probe_all(devices)?;
    let current = prompt::existing(PASSPHRASE_ENV, "Current passphrase")?;
    let new_passphrase = prompt::new(NEW_PASSPHRASE_ENV, "New passphrase")?;

    let job = MigrationJob::new(
        partitions,
        MigrationMode::Rekey { new_passphrase },
        current,
        &config.backup_root,
    );
    let (_, reporter) = drive(
        SystemBackend::new(config.luks.clone()),
        job,
        config.channel_capacity,
    )?;

    let failed = reporter.count(MigrationErrorKind::PassphraseError);
    if failed > 0 {
        bail!("The passphrase could not be changed on {failed} partition(s)");
    }
    println!("Passphrase changed");
    Ok(())
}

pub fn status(device: &Path) -> Result<()> {
    let status = partcrypt_sys::status(device)
        .with_context(|| format!("failed to query {}", device.display()))?;
    let partition = probe_partition(device)
        .with_context(|| format!("failed to probe {}", device.display()))?;

    let output = serde_json::to_string_pretty(&json!({
        "status": status,
        "partition": partition,
    }))?;
    println!("{output}");
    Ok(())
}

pub fn crypttab_list(crypttab: &Path) -> Result<()> {
    let records = partcrypt_sys::read_crypttab(crypttab)
        .with_context(|| format!("failed to read {}", crypttab.display()))?;

    let mut out = io::stdout().lock();
    for record in records {
        writeln!(out, "{}", record.to_line())?;
    }
    Ok(())
}

pub fn crypttab_add(
    config: &Config,
    device: &Path,
    filesystem_type: Option<&str>,
) -> Result<()> {
    require_root()?;
    let filesystem_type = match filesystem_type {
        Some(fs_type) => FilesystemType::parse(fs_type),
        None => partcrypt_sys::status(device)?.filesystem_type,
    };

    match partcrypt_sys::write_crypttab(
        device,
        &filesystem_type,
        &config.crypttab,
        config.keyfile.as_deref(),
        false,
    )? {
        Some(record) => println!("{}", record.to_line()),
        None => println!("Nothing registered for {}", device.display()),
    }
    Ok(())
}

pub fn crypttab_remove(config: &Config, device: &Path) -> Result<()> {
    require_root()?;
    partcrypt_sys::write_crypttab(
        device,
        &FilesystemType::default(),
        &config.crypttab,
        None,
        true,
    )?;
    println!("Removed {} from {}", device.display(), config.crypttab.display());
    Ok(())
}

pub fn wipe(device: &Path, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!(
            "Wiping overwrites every byte of {}; pass --yes to confirm",
            device.display()
        );
    }
    require_root()?;
    eprintln!("{NOT_ABORTABLE}");
    partcrypt_sys::wipe(device).with_context(|| format!("failed to wipe {}", device.display()))?;
    println!("Wiped {}", device.display());
    Ok(())
}

pub fn check(backup_root: &Path) -> Result<()> {
    let leftovers = BackupArea::find_interrupted(backup_root)
        .with_context(|| format!("failed to scan {}", backup_root.display()))?;

    if leftovers.is_empty() {
        println!("No interrupted migrations found under {}", backup_root.display());
        return Ok(());
    }

    println!("Backup areas left by interrupted migrations:");
    for area in &leftovers {
        println!("  {}", area.display());
    }
    bail!(
        "{} interrupted migration(s); restore the data from the listed directories",
        leftovers.len()
    );
}
