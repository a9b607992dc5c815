// SPDX-License-Identifier: GPL-3.0-only

//! Small filesystem helpers

use std::ffi::CString;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{Result, SysError};

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

pub fn chown_path(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SysError::OperationFailed(format!("Invalid path: {}", path.display())))?;
    let result = unsafe { libc::chown(c_path.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if result != 0 {
        return Err(SysError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

/// Create a directory (if missing) and force its mode and, optionally, its owner.
pub fn mkdir_with_perms(path: &Path, mode: u32, owner: Option<(u32, u32)>) -> Result<()> {
    match DirBuilder::new().mode(mode).create(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    set_mode(path, mode)?;
    if let Some((uid, gid)) = owner {
        chown_path(path, uid, gid)?;
    }
    Ok(())
}

pub fn mkdir_recursive(path: &Path, mode: u32) -> Result<()> {
    DirBuilder::new().recursive(true).mode(mode).create(path)?;
    Ok(())
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    Ok(fs::copy(src, dst)?)
}

/// First non-hidden entry of `dir` whose name contains `needle`, in name order.
pub fn find_file_containing(dir: &Path, needle: &str) -> Option<PathBuf> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.file_name())
        .filter(|name| {
            let name = name.to_string_lossy();
            !name.starts_with('.') && name.contains(needle)
        })
        .collect();

    names.sort();
    names.into_iter().next().map(|name| dir.join(name))
}
