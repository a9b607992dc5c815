// SPDX-License-Identifier: GPL-3.0-only

//! Mount syscall wrappers

use std::path::Path;

use nix::mount::{MntFlags, MsFlags};
use tracing::{debug, info};

use crate::error::{Result, SysError};

/// Flags the orchestrator needs; translated to `MS_*` at the syscall boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountFlags {
    pub read_only: bool,
    pub no_atime: bool,
}

impl MountFlags {
    pub const NOATIME: Self = Self {
        read_only: false,
        no_atime: true,
    };

    pub const RDONLY_NOATIME: Self = Self {
        read_only: true,
        no_atime: true,
    };

    pub fn to_ms_flags(self) -> MsFlags {
        let mut flags = MsFlags::empty();
        if self.read_only {
            flags |= MsFlags::MS_RDONLY;
        }
        if self.no_atime {
            flags |= MsFlags::MS_NOATIME;
        }
        flags
    }
}

/// Mount a block device or image-backed loop device.
pub fn mount_fs(source: &Path, target: &Path, fs_type: &str, flags: MountFlags) -> Result<()> {
    debug!("mount {:?} -> {:?} ({}, {:?})", source, target, fs_type, flags);

    nix::mount::mount(
        Some(source),
        target,
        Some(fs_type),
        flags.to_ms_flags(),
        Some(""),
    )
    .map_err(|errno| SysError::MountFailed {
        src: source.to_path_buf(),
        target: target.to_path_buf(),
        reason: errno.desc().to_string(),
    })
}

/// Bind-mount a directory; read-only binds need a second remount pass.
pub fn bind(source: &Path, target: &Path, read_only: bool) -> Result<()> {
    debug!("bind {:?} -> {:?} (ro: {})", source, target, read_only);

    let failed = |errno: nix::errno::Errno| SysError::MountFailed {
        src: source.to_path_buf(),
        target: target.to_path_buf(),
        reason: errno.desc().to_string(),
    };

    nix::mount::mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(failed)?;

    if read_only {
        nix::mount::mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(failed)?;
    }

    Ok(())
}

pub fn unmount(target: &Path) -> Result<()> {
    info!("Unmounting {:?}", target);
    nix::mount::umount2(target, MntFlags::empty()).map_err(|errno| {
        SysError::OperationFailed(format!("umount {}: {}", target.display(), errno.desc()))
    })
}
