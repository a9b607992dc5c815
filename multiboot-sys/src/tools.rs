// SPDX-License-Identifier: GPL-3.0-only

//! Helper binaries shipped next to the boot manager

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use which::which;

use crate::error::{Result, SysError};
use crate::fsutil;

pub const BUSYBOX_BIN: &str = "busybox";
pub const KEXEC_BIN: &str = "kexec";
pub const NTFS_BIN: &str = "ntfs-3g";

/// Resolved paths of the external helpers
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    busybox: Option<PathBuf>,
    kexec: Option<PathBuf>,
    ntfs: Option<PathBuf>,
}

impl Toolbox {
    /// Look for each helper in `base_dir` first, then on `PATH`.
    ///
    /// `kexec` and `ntfs-3g` found in `base_dir` are chmodded to 0777.
    pub fn discover(base_dir: &Path) -> Self {
        let toolbox = Self {
            busybox: Self::find(base_dir, BUSYBOX_BIN, false),
            kexec: Self::find(base_dir, KEXEC_BIN, true),
            ntfs: Self::find(base_dir, NTFS_BIN, true),
        };
        debug!("Toolbox: {:?}", toolbox);
        toolbox
    }

    pub fn with_paths(busybox: PathBuf, kexec: PathBuf, ntfs: PathBuf) -> Self {
        Self {
            busybox: Some(busybox),
            kexec: Some(kexec),
            ntfs: Some(ntfs),
        }
    }

    fn find(base_dir: &Path, name: &str, make_executable: bool) -> Option<PathBuf> {
        let local = base_dir.join(name);
        if local.exists() {
            if make_executable && let Err(e) = fsutil::set_mode(&local, 0o777) {
                warn!("Failed to chmod {:?}: {}", local, e);
            }
            return Some(local);
        }

        match which(name) {
            Ok(path) => {
                info!("Using {} from PATH at {:?}", name, path);
                Some(path)
            }
            Err(_) => {
                warn!("{} not found in {:?} or PATH", name, base_dir);
                None
            }
        }
    }

    fn require<'a>(path: &'a Option<PathBuf>, name: &str) -> Result<&'a Path> {
        path.as_deref()
            .ok_or_else(|| SysError::ToolNotFound(name.to_string()))
    }

    pub fn busybox(&self) -> Result<&Path> {
        Self::require(&self.busybox, BUSYBOX_BIN)
    }

    pub fn kexec(&self) -> Result<&Path> {
        Self::require(&self.kexec, KEXEC_BIN)
    }

    pub fn ntfs(&self) -> Result<&Path> {
        Self::require(&self.ntfs, NTFS_BIN)
    }
}
