// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use partcrypt_migrate::MigrationBackend;
use partcrypt_sys::{FormatOutcome, Result, SysError};
use partcrypt_types::{
    FilesystemType, MigrationEvent, Passphrase, device_basename, is_mapped_path, mapped_path_for,
    strip_mapper,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    IsMounted(PathBuf),
    Unmount(PathBuf),
    Mount { device: PathBuf, mount_point: PathBuf },
    FilesystemType(PathBuf),
    Uuid(PathBuf),
    RawDevice(PathBuf),
    FormatAndEncrypt(PathBuf),
    Close(PathBuf),
    ChangePassphrase(PathBuf),
    CreateKeyfile { keyfile: PathBuf, device: PathBuf },
    Format {
        device: PathBuf,
        filesystem_type: FilesystemType,
        label: Option<String>,
    },
    CopyTree { source: PathBuf, destination: PathBuf },
    AssignToLoggedUser(PathBuf),
}

impl Call {
    pub fn device(&self) -> Option<&Path> {
        match self {
            Call::Unmount(device)
            | Call::FormatAndEncrypt(device)
            | Call::Close(device)
            | Call::ChangePassphrase(device) => Some(device),
            Call::Mount { device, .. } | Call::Format { device, .. } => Some(device),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatBehaviour {
    #[default]
    Succeed,
    Mismatch,
    Fail,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub mounted: HashSet<PathBuf>,
    pub inner_fs: HashMap<PathBuf, FilesystemType>,
    pub backup_exit: i32,
    pub restore_exit: i32,
    pub unmount_fails: bool,
    pub encrypt_fails: bool,
    pub format: FormatBehaviour,
    pub mount_fails: bool,
    pub label_warning: Option<String>,
    pub passphrase_fails: HashSet<PathBuf>,
    pub logged_user: Option<String>,
    /// `(directory, device)` pairs; a path lives on the device of its
    /// deepest listed directory
    pub storage: Vec<(PathBuf, PathBuf)>,
    /// Devices freshly formatted and not yet written to
    blank: HashSet<PathBuf>,
}

/// Records every call and simulates devices with plain directories
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub state: Arc<Mutex<FakeState>>,
}

fn tool_failure(command: &str) -> SysError {
    SysError::CommandFailed {
        command: command.to_string(),
        code: Some(1),
        stderr: format!("{command} failed"),
    }
}

fn copy_dir(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

fn clear_dir(path: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(self, configure: impl FnOnce(&mut FakeState)) -> Self {
        configure(&mut self.state.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, device: &Path) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.device() == Some(device))
            .collect()
    }

    pub fn copies(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CopyTree {
                    source,
                    destination,
                } => Some((source, destination)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MigrationBackend for FakeBackend {
    fn is_mounted(&self, path: &Path) -> Result<bool> {
        self.record(Call::IsMounted(path.to_path_buf()));
        Ok(self.state.lock().unwrap().mounted.contains(path))
    }

    // Not recorded: a pure lookup in `storage`.
    fn is_on_device(&self, path: &Path, device: &Path) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .storage
            .iter()
            .filter(|(directory, _)| path.starts_with(directory))
            .max_by_key(|(directory, _)| directory.components().count())
            .is_some_and(|(_, holder)| holder == device))
    }

    fn unmount(&self, device: &Path) -> Result<()> {
        self.record(Call::Unmount(device.to_path_buf()));
        if self.state.lock().unwrap().unmount_fails {
            return Err(SysError::DeviceBusy(device.display().to_string()));
        }
        Ok(())
    }

    fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        _filesystem_type: &FilesystemType,
    ) -> Result<()> {
        self.record(Call::Mount {
            device: device.to_path_buf(),
            mount_point: mount_point.to_path_buf(),
        });
        let mut state = self.state.lock().unwrap();
        if state.mount_fails {
            return Err(tool_failure("mount"));
        }
        if state.blank.remove(device) {
            fs::create_dir_all(mount_point)?;
            clear_dir(mount_point)?;
        }
        state.mounted.insert(mount_point.to_path_buf());
        Ok(())
    }

    fn filesystem_type(&self, device: &Path) -> Result<Option<FilesystemType>> {
        self.record(Call::FilesystemType(device.to_path_buf()));
        Ok(self.state.lock().unwrap().inner_fs.get(device).cloned())
    }

    fn uuid(&self, device: &Path) -> Result<Option<String>> {
        self.record(Call::Uuid(device.to_path_buf()));
        let prefix = if is_mapped_path(device) { "inner" } else { "raw" };
        Ok(Some(format!("{prefix}-{}", device_basename(device))))
    }

    fn raw_device(&self, device: &Path) -> Result<PathBuf> {
        self.record(Call::RawDevice(device.to_path_buf()));
        Ok(strip_mapper(device))
    }

    fn format_and_encrypt(&self, device: &Path, _passphrase: &Passphrase) -> Result<PathBuf> {
        self.record(Call::FormatAndEncrypt(device.to_path_buf()));
        if self.state.lock().unwrap().encrypt_fails {
            return Err(tool_failure("cryptsetup luksFormat"));
        }
        Ok(mapped_path_for(device))
    }

    fn close(&self, device: &Path) -> Result<()> {
        self.record(Call::Close(device.to_path_buf()));
        Ok(())
    }

    fn change_passphrase(&self, device: &Path, _old: &Passphrase, _new: &Passphrase) -> Result<()> {
        self.record(Call::ChangePassphrase(device.to_path_buf()));
        if self.state.lock().unwrap().passphrase_fails.contains(device) {
            return Err(tool_failure("cryptsetup luksChangeKey"));
        }
        Ok(())
    }

    fn create_keyfile(
        &self,
        keyfile: &Path,
        device: &Path,
        _passphrase: &Passphrase,
    ) -> Result<()> {
        self.record(Call::CreateKeyfile {
            keyfile: keyfile.to_path_buf(),
            device: device.to_path_buf(),
        });
        Ok(())
    }

    fn format(
        &self,
        device: &Path,
        filesystem_type: &FilesystemType,
        label: Option<&str>,
    ) -> Result<FormatOutcome> {
        self.record(Call::Format {
            device: device.to_path_buf(),
            filesystem_type: filesystem_type.clone(),
            label: label.map(str::to_string),
        });
        let mut state = self.state.lock().unwrap();
        match state.format {
            FormatBehaviour::Fail => Err(tool_failure("mkfs")),
            FormatBehaviour::Mismatch => Err(SysError::FilesystemMismatch {
                device: device.display().to_string(),
                expected: filesystem_type.to_string(),
                found: "vfat".to_string(),
            }),
            FormatBehaviour::Succeed => {
                state.blank.insert(device.to_path_buf());
                Ok(FormatOutcome {
                    label_warning: state.label_warning.clone(),
                })
            }
        }
    }

    fn copy_tree(
        &self,
        source: &Path,
        destination: &Path,
        progress: &mut dyn FnMut(f64),
    ) -> Result<i32> {
        self.record(Call::CopyTree {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
        let exit = {
            let state = self.state.lock().unwrap();
            if destination.components().any(|part| part.as_os_str() == "luks_bak") {
                state.backup_exit
            } else {
                state.restore_exit
            }
        };
        progress(0.5);
        if exit != 0 {
            return Ok(exit);
        }
        copy_dir(source, destination)?;
        progress(1.0);
        Ok(0)
    }

    fn assign_to_logged_user(&self, path: &Path) -> Result<Option<String>> {
        self.record(Call::AssignToLoggedUser(path.to_path_buf()));
        Ok(self.state.lock().unwrap().logged_user.clone())
    }
}

pub fn fractions(events: &[MigrationEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            MigrationEvent::Progress { fraction } => Some(*fraction),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[MigrationEvent]) -> Vec<(Option<usize>, partcrypt_types::MigrationErrorKind, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            MigrationEvent::Error {
                index, code, fatal, ..
            } => Some((*index, *code, *fatal)),
            _ => None,
        })
        .collect()
}

pub fn done_indices(events: &[MigrationEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            MigrationEvent::PartitionDone { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

pub fn assert_monotonic(fractions: &[f64]) {
    for pair in fractions.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {fractions:?}");
    }
}
