// SPDX-License-Identifier: GPL-3.0-only

//! Ownership hand-over to the logged-in desktop user

use std::ffi::{CStr, CString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};

/// Login name of the user behind the current session
///
/// Asks `logname` first and falls back to `$SUDO_USER`; root is never
/// reported.
pub fn logged_user() -> Option<String> {
    let from_logname = ToolCommand::new("logname")
        .output()
        .ok()
        .filter(|output| output.success())
        .and_then(|output| output.first_line());

    from_logname
        .or_else(|| std::env::var("SUDO_USER").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name != "root")
}

pub fn uid_gid_for_name(name: &str) -> Option<(u32, u32)> {
    let name = CString::new(name).ok()?;
    unsafe {
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            return None;
        }
        Some(((*pw).pw_uid as u32, (*pw).pw_gid as u32))
    }
}

pub fn username_for_uid(uid: u32) -> Option<String> {
    unsafe {
        let pw = libc::getpwuid(uid);
        if pw.is_null() {
            return None;
        }
        let name = CStr::from_ptr((*pw).pw_name);
        name.to_str().ok().map(|name| name.to_string())
    }
}

/// Change ownership without following symlinks
pub fn lchown_path(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
        SysError::OperationFailed(format!("Invalid path for chown {}: {}", path.display(), e))
    })?;
    let result = unsafe { libc::lchown(c_path.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if result != 0 {
        let error = std::io::Error::last_os_error();
        if error.kind() == std::io::ErrorKind::PermissionDenied {
            return Err(SysError::PermissionDenied(path.display().to_string()));
        }
        return Err(SysError::OperationFailed(format!(
            "Failed to chown {}: {}",
            path.display(),
            error
        )));
    }
    Ok(())
}

/// Chown `root` and everything below it
///
/// Entries that cannot be changed are skipped and counted; only a failure on
/// `root` itself is an error.
pub fn chown_recursive(root: &Path, uid: u32, gid: u32) -> Result<u64> {
    lchown_path(root, uid, gid)?;

    let mut failures = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(directory) = stack.pop() {
        let Ok(entries) = fs::read_dir(&directory) else {
            failures += 1;
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Err(error) = lchown_path(&path, uid, gid) {
                debug!("{}", error);
                failures += 1;
                continue;
            }
            if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                stack.push(path);
            }
        }
    }

    if failures > 0 {
        warn!("{} entries below {} kept their owner", failures, root.display());
    }
    Ok(failures)
}

/// Give `path` (recursively) to the logged-in user
///
/// Returns the user name, or `None` when nobody is logged in.
pub fn assign_to_logged_user(path: &Path) -> Result<Option<String>> {
    let Some(user) = logged_user() else {
        debug!("No logged-in user to hand {} to", path.display());
        return Ok(None);
    };
    let (uid, gid) = uid_gid_for_name(&user)
        .ok_or_else(|| SysError::OperationFailed(format!("Unknown user {user}")))?;

    chown_recursive(path, uid, gid)?;
    info!("Assigned {} to {}", path.display(), user);
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_uid_zero() {
        assert_eq!(username_for_uid(0).as_deref(), Some("root"));
        assert_eq!(uid_gid_for_name("root"), Some((0, 0)));
        assert_eq!(uid_gid_for_name("partcrypt-no-such-user"), None);
    }

    #[test]
    fn chown_to_current_owner_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("a/b")).expect("mkdir");
        fs::write(dir.path().join("a/b/file"), "x").expect("write");
        std::os::unix::fs::symlink("/nonexistent", dir.path().join("a/dangling"))
            .expect("symlink");

        let (uid, gid) = unsafe { (libc::getuid() as u32, libc::getgid() as u32) };
        let failures = chown_recursive(dir.path(), uid, gid).expect("own files");
        assert_eq!(failures, 0);
    }
}
