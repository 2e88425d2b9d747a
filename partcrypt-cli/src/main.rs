// SPDX-License-Identifier: GPL-3.0-only

//! partcrypt: encrypt or decrypt partitions in place, keeping their data

mod commands;
mod config;
mod logging;
mod prompt;
mod render;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::{Config, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "partcrypt")]
#[command(about = "Encrypt or decrypt partitions without losing their data", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Values overriding the configuration file
#[derive(Args)]
struct Overrides {
    /// Directory holding backup areas during a migration
    #[arg(long, global = true)]
    backup_root: Option<PathBuf>,

    #[arg(long, global = true)]
    crypttab: Option<PathBuf>,

    #[arg(long, global = true)]
    fstab: Option<PathBuf>,

    /// Shared key file registered for non-root partitions
    #[arg(long, global = true)]
    keyfile: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(backup_root) = self.backup_root {
            config.backup_root = backup_root;
        }
        if let Some(crypttab) = self.crypttab {
            config.crypttab = crypttab;
        }
        if let Some(fstab) = self.fstab {
            config.fstab = fstab;
        }
        if let Some(keyfile) = self.keyfile {
            config.keyfile = Some(keyfile);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt partitions, keeping their data
    Encrypt {
        #[arg(required = true)]
        devices: Vec<PathBuf>,

        /// Leave crypttab and fstab untouched
        #[arg(long)]
        no_boot_config: bool,
    },

    /// Decrypt unlocked partitions, keeping their data
    Decrypt {
        #[arg(required = true)]
        devices: Vec<PathBuf>,

        /// Leave crypttab and fstab untouched
        #[arg(long)]
        no_boot_config: bool,
    },

    /// Change the passphrase of encrypted partitions
    ChangePassphrase {
        #[arg(required = true)]
        devices: Vec<PathBuf>,
    },

    /// Print encryption status and partition details as JSON
    Status { device: PathBuf },

    /// Inspect or edit crypttab
    Crypttab {
        #[command(subcommand)]
        action: CrypttabCommand,
    },

    /// Overwrite a partition with random data
    Wipe {
        device: PathBuf,

        /// Confirm that all data on the device will be destroyed
        #[arg(long)]
        yes: bool,
    },

    /// Look for backup areas left by interrupted migrations
    Check,
}

#[derive(Subcommand)]
enum CrypttabCommand {
    /// Print every record
    List,

    /// Register an encrypted partition
    Add {
        device: PathBuf,

        /// Filesystem inside the container; detected when omitted
        #[arg(long)]
        fs_type: Option<String>,
    },

    /// Unregister an encrypted partition
    Remove { device: PathBuf },
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path, true)?,
        None => Config::load(Path::new(DEFAULT_CONFIG_PATH), false)?,
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.overrides)?;
    logging::init(&config.logging);

    match cli.command {
        Commands::Encrypt {
            devices,
            no_boot_config,
        } => commands::migrate(&config, &devices, true, no_boot_config),
        Commands::Decrypt {
            devices,
            no_boot_config,
        } => commands::migrate(&config, &devices, false, no_boot_config),
        Commands::ChangePassphrase { devices } => commands::change_passphrase(&config, &devices),
        Commands::Status { device } => commands::status(&device),
        Commands::Crypttab { action } => match action {
            CrypttabCommand::List => commands::crypttab_list(&config.crypttab),
            CrypttabCommand::Add { device, fs_type } => {
                commands::crypttab_add(&config, &device, fs_type.as_deref())
            }
            CrypttabCommand::Remove { device } => commands::crypttab_remove(&config, &device),
        },
        Commands::Wipe { device, yes } => commands::wipe(&device, yes),
        Commands::Check => commands::check(&config.backup_root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_replace_configured_paths() {
        let cli = Cli::try_parse_from([
            "partcrypt",
            "encrypt",
            "/dev/sdb1",
            "--backup-root",
            "/mnt/spare",
            "--keyfile",
            "/etc/partcrypt/key",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.overrides.apply(&mut config);
        assert_eq!(config.backup_root, PathBuf::from("/mnt/spare"));
        assert_eq!(config.keyfile, Some(PathBuf::from("/etc/partcrypt/key")));
        assert_eq!(config.crypttab, PathBuf::from("/etc/crypttab"));
    }

    #[test]
    fn migration_needs_a_device() {
        assert!(Cli::try_parse_from(["partcrypt", "decrypt"]).is_err());
        let cli = Cli::try_parse_from(["partcrypt", "decrypt", "/dev/sdb1", "/dev/sdb2"]).unwrap();
        match cli.command {
            Commands::Decrypt {
                devices,
                no_boot_config,
            } => {
                assert_eq!(devices.len(), 2);
                assert!(!no_boot_config);
            }
            _ => panic!("expected decrypt"),
        }
    }
}
