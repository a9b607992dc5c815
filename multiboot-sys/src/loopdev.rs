// SPDX-License-Identifier: GPL-3.0-only

//! Loop device creation and binding
//!
//! The boot environment has no udev, so device nodes are created by hand with the loop
//! major number and the index handed out by [`LoopAllocator`].

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use nix::errno::Errno;
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use tracing::{debug, error};

use crate::error::{Result, SysError};

const LOOP_MAJOR: u64 = 7;

nix::ioctl_write_int_bad!(loop_set_fd, 0x4C00);

/// Hands out loop indices that are never reused for the allocator's lifetime
#[derive(Debug, Default)]
pub struct LoopAllocator {
    next: AtomicU32,
}

impl LoopAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    pub fn allocate(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

pub fn device_path(dev_dir: &Path, index: u32) -> PathBuf {
    dev_dir.join(format!("loop{index}"))
}

/// Create `<dev_dir>/loop<index>` and bind `backing` to it.
///
/// Both descriptors are closed on return; the kernel keeps the binding alive.
pub fn attach(dev_dir: &Path, index: u32, backing: &Path) -> Result<PathBuf> {
    let backing_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(backing)
        .map_err(|e| {
            error!("Failed to open image {:?}: {}", backing, e);
            SysError::Io(e)
        })?;

    let device = device_path(dev_dir, index);
    let loop_failed = |reason: String| SysError::LoopSetup {
        device: device.clone(),
        reason,
    };

    match mknod(
        &device,
        SFlag::S_IFBLK,
        Mode::from_bits_truncate(0o777),
        makedev(LOOP_MAJOR, u64::from(index)),
    ) {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(errno) => return Err(loop_failed(format!("mknod: {}", errno.desc()))),
    }

    let device_file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&device)
        .map_err(|e| loop_failed(format!("open: {e}")))?;

    // SAFETY: both descriptors are open for the duration of the call.
    unsafe { loop_set_fd(device_file.as_raw_fd(), backing_file.as_raw_fd()) }
        .map_err(|errno| loop_failed(format!("LOOP_SET_FD: {}", errno.desc())))?;

    debug!("Bound {:?} to {:?}", backing, device);
    Ok(device)
}
