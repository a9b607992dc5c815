// SPDX-License-Identifier: GPL-3.0-only

//! Seams between orchestration logic and privileged operations

use std::path::{Path, PathBuf};

use crate::cmd::{self, CommandOutcome};
use crate::error::Result;
use crate::loopdev;
use crate::mount::{self, MountFlags};

pub trait MountAdapter: Send + Sync {
    fn mount(&self, source: &Path, target: &Path, fs_type: &str, flags: MountFlags) -> Result<()>;

    fn bind(&self, source: &Path, target: &Path, read_only: bool) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    /// Create loop device `index` and bind `backing` to it; returns the device node.
    fn attach_loop(&self, index: u32, backing: &Path) -> Result<PathBuf>;
}

pub trait CommandAdapter: Send + Sync {
    /// Run to completion; a non-zero exit status is an error.
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutcome>;
}

/// Real syscalls
#[derive(Debug, Clone)]
pub struct SystemMounts {
    loop_dev_dir: PathBuf,
}

impl SystemMounts {
    pub fn new(loop_dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            loop_dev_dir: loop_dev_dir.into(),
        }
    }
}

impl Default for SystemMounts {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl MountAdapter for SystemMounts {
    fn mount(&self, source: &Path, target: &Path, fs_type: &str, flags: MountFlags) -> Result<()> {
        mount::mount_fs(source, target, fs_type, flags)
    }

    fn bind(&self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        mount::bind(source, target, read_only)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        mount::unmount(target)
    }

    fn attach_loop(&self, index: u32, backing: &Path) -> Result<PathBuf> {
        loopdev::attach(&self.loop_dev_dir, index, backing)
    }
}

/// Real subprocesses
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommands;

impl CommandAdapter for SystemCommands {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutcome> {
        cmd::run(program, args)
    }
}
