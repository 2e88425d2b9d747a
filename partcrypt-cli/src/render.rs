// SPDX-License-Identifier: GPL-3.0-only

//! Terminal rendering of migration events

use std::io::{self, Write};

use partcrypt_types::{MigrationErrorKind, MigrationEvent, Partition};
use tracing::debug;

pub struct Reporter<W: Write> {
    out: W,
    devices: Vec<String>,
    last_percent: Option<u32>,
    errors: Vec<MigrationErrorKind>,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, partitions: &[Partition]) -> Self {
        Self {
            out,
            devices: partitions
                .iter()
                .map(|partition| partition.device.display().to_string())
                .collect(),
            last_percent: None,
            errors: Vec::new(),
        }
    }

    fn device(&self, index: Option<usize>) -> Option<&str> {
        index.and_then(|index| self.devices.get(index)).map(String::as_str)
    }

    pub fn handle(&mut self, event: &MigrationEvent) -> io::Result<()> {
        match event {
            MigrationEvent::Progress { fraction } => {
                let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
                if self.last_percent != Some(percent) {
                    self.last_percent = Some(percent);
                    writeln!(self.out, "[{percent:>3}%]")?;
                }
            }
            MigrationEvent::Stage { index, state } => {
                debug!("{}: {:?}", self.device(Some(*index)).unwrap_or("?"), state);
            }
            MigrationEvent::PartitionDone { index, partition } => {
                let state = if partition.is_encrypted {
                    "encrypted"
                } else {
                    "not encrypted"
                };
                let before = self.device(Some(*index)).unwrap_or("?").to_string();
                writeln!(
                    self.out,
                    "{before}: now {} ({}, {state})",
                    partition.device.display(),
                    partition.filesystem_type
                )?;
            }
            MigrationEvent::Error {
                index,
                code,
                message,
                fatal,
            } => {
                self.errors.push(*code);
                let severity = if *fatal { "error" } else { "warning" };
                match self.device(*index).map(str::to_string) {
                    Some(device) => writeln!(self.out, "{severity}: {device}: {message}")?,
                    None => writeln!(self.out, "{severity}: {message}")?,
                }
            }
        }
        self.out.flush()
    }

    /// Number of reported errors of `kind`
    pub fn count(&self, kind: MigrationErrorKind) -> usize {
        self.errors.iter().filter(|code| **code == kind).count()
    }
}
