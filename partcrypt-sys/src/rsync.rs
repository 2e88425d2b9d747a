// SPDX-License-Identifier: GPL-3.0-only

//! Directory tree copies through rsync
//!
//! Progress is estimated from the number of lines rsync prints against a
//! file count taken before the copy starts.

use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Result, SysError};
use crate::progress::{RateLimiter, compute_fraction};

/// Paths never copied, anchored at the source root
pub const EXCLUDED: [&str; 9] = [
    "dev/*",
    "proc/*",
    "sys/*",
    "tmp/*",
    "run/*",
    "mnt/*",
    "media/*",
    "lost+found",
    "source",
];

fn with_trailing_slash(path: &Path) -> OsString {
    let mut value = path.as_os_str().to_os_string();
    if !value.to_string_lossy().ends_with('/') {
        value.push("/");
    }
    value
}

pub fn rsync_args(source: &Path, destination: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--owner",
        "--group",
        "--ignore-errors",
        "--verbose",
        "--archive",
        "--no-D",
        "--acls",
        "--times",
        "--perms",
        "--hard-links",
        "--xattrs",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();

    for pattern in EXCLUDED {
        args.push(format!("--exclude=/{pattern}").into());
    }
    args.push(with_trailing_slash(source));
    args.push(destination.as_os_str().to_os_string());
    args
}

fn count_tree(root: &Path, root_dev: u64) -> u64 {
    let mut files = 0;
    let mut stack = vec![root.to_path_buf()];

    while let Some(directory) = stack.pop() {
        let Ok(entries) = fs::read_dir(&directory) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(metadata) = entry.path().symlink_metadata() else {
                continue;
            };
            if metadata.is_dir() {
                if metadata.dev() == root_dev {
                    stack.push(entry.path());
                }
            } else {
                files += 1;
            }
        }
    }

    files
}

/// Number of non-directory entries below `root`, skipping excluded paths
pub fn count_files(root: &Path) -> u64 {
    let Ok(root_metadata) = root.symlink_metadata() else {
        return 0;
    };
    if !root_metadata.is_dir() {
        return 0;
    }
    let root_dev = root_metadata.dev();

    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    let top: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| !is_excluded(root, path))
        .collect();

    top.par_iter()
        .map(|path| match path.symlink_metadata() {
            Ok(metadata) if metadata.is_dir() && metadata.dev() == root_dev => {
                count_tree(path, root_dev)
            }
            Ok(metadata) if metadata.is_dir() => 0,
            Ok(_) => 1,
            Err(_) => 0,
        })
        .sum()
}

fn is_excluded(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let relative = relative.to_string_lossy();
    EXCLUDED.iter().any(|pattern| {
        let name = pattern.trim_end_matches("/*");
        name == relative
    })
}

/// Copy the contents of `source` into `destination`
///
/// `progress` receives fractions in [0, 1], at most once per second.
/// Returns rsync's exit code; with nothing to copy rsync is not run and 0
/// is returned.
pub fn copy_tree<F>(source: &Path, destination: &Path, mut progress: F) -> Result<i32>
where
    F: FnMut(f64),
{
    let total = count_files(source);
    if total == 0 {
        info!("Nothing to copy from {}", source.display());
        return Ok(0);
    }

    fs::create_dir_all(destination)?;
    info!(
        "Copying {} files from {} to {}",
        total,
        source.display(),
        destination.display()
    );

    let mut child = Command::new("rsync")
        .args(rsync_args(source, destination))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| match error.kind() {
            ErrorKind::NotFound => SysError::ToolNotFound("rsync".to_string()),
            _ => SysError::Io(error),
        })?;

    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text);
        }
        text
    });

    let mut copied = 0u64;
    let mut limiter = RateLimiter::default();
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).split(b'\n') {
            let Ok(line) = line else {
                break;
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            copied = (copied + 1).min(total);
            if limiter.ready(Instant::now()) {
                progress(compute_fraction(copied, total));
            }
        }
    }

    let status = child.wait()?;
    let stderr = stderr_reader.join().unwrap_or_default();
    let code = status.code().unwrap_or(-1);

    if code == 0 {
        debug!("rsync finished: {} lines for {} files", copied, total);
    } else {
        warn!("rsync exited with {}: {}", code, stderr.trim());
    }
    Ok(code)
}
