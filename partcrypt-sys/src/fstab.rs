// SPDX-License-Identifier: GPL-3.0-only

//! `/etc/fstab` maintenance

use std::fs;
use std::path::Path;

use partcrypt_types::Partition;
use tracing::info;

use crate::crypttab::write_table;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    /// Entry mounting `partition` by UUID at its current mount point
    ///
    /// Swap partitions mount at `none`. Returns `None` without a UUID or
    /// without a mount point for a non-swap partition.
    pub fn for_partition(partition: &Partition) -> Option<Self> {
        let uuid = partition.uuid.as_ref()?;
        let (mount_point, options, pass) = if partition.is_swap() {
            ("none".to_string(), "sw", 0)
        } else {
            let mount_point = partition.mount_point.as_ref()?;
            let pass = if partition.is_root() { 1 } else { 2 };
            (mount_point.display().to_string(), "defaults", pass)
        };

        Some(Self {
            source: format!("UUID={uuid}"),
            mount_point,
            fs_type: partition.filesystem_type.as_str().to_string(),
            options: options.to_string(),
            dump: 0,
            pass,
        })
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return None;
        }
        Some(Self {
            source: fields[0].to_string(),
            mount_point: fields[1].replace("\\040", " "),
            fs_type: fields[2].to_string(),
            options: fields.get(3).unwrap_or(&"defaults").to_string(),
            dump: fields.get(4).and_then(|value| value.parse().ok()).unwrap_or(0),
            pass: fields.get(5).and_then(|value| value.parse().ok()).unwrap_or(0),
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.source,
            self.mount_point.replace(' ', "\\040"),
            self.fs_type,
            self.options,
            self.dump,
            self.pass
        )
    }

    pub fn is_swap(&self) -> bool {
        self.fs_type == "swap"
    }

    fn replaces(&self, existing: &FstabEntry, previous_sources: &[String]) -> bool {
        if self.is_swap() {
            existing.is_swap()
                && (existing.source == self.source || previous_sources.contains(&existing.source))
        } else {
            existing.mount_point == self.mount_point
        }
    }
}

/// Point the fstab line for `entry` at its new source and type
///
/// Non-swap entries match by mount point, swap entries by their previous
/// source. Options, dump and pass of a matched line are kept. Unmatched
/// entries are appended.
pub fn upsert_entry(content: &str, entry: &FstabEntry, previous_sources: &[String]) -> String {
    let mut lines = Vec::new();
    let mut written = false;

    for line in content.lines() {
        match FstabEntry::parse_line(line) {
            Some(existing) if entry.replaces(&existing, previous_sources) => {
                if !written {
                    let merged = FstabEntry {
                        options: existing.options,
                        dump: existing.dump,
                        pass: existing.pass,
                        ..entry.clone()
                    };
                    lines.push(merged.to_line());
                    written = true;
                }
            }
            _ => lines.push(line.to_string()),
        }
    }

    if !written {
        lines.push(entry.to_line());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn read_fstab(path: &Path) -> Result<Vec<FstabEntry>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().filter_map(FstabEntry::parse_line).collect()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

pub fn update_fstab(path: &Path, entry: &FstabEntry, previous_sources: &[String]) -> Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(error) => return Err(error.into()),
    };
    write_table(path, &upsert_entry(&content, entry, previous_sources))?;
    info!("Updated {} for {}", path.display(), entry.mount_point);
    Ok(())
}
