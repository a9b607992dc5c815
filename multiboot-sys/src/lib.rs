// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the multiboot orchestrator
//!
//! This crate wraps everything that touches the kernel or external tools directly:
//! - mount, bind and unmount syscalls
//! - loop device node creation and binding
//! - `blkid` output parsing
//! - Android boot image parsing and extraction
//! - kernel log access and the continuation marker
//! - external helper execution (busybox, kexec, ntfs-3g)
//!
//! These operations require elevated privileges. Higher layers reach mounts and commands
//! through the [`MountAdapter`] and [`CommandAdapter`] traits so they can be exercised
//! without root.

pub mod adapter;
pub mod blkid;
pub mod bootimg;
pub mod cmd;
pub mod error;
pub mod fsutil;
pub mod kmsg;
pub mod loopdev;
pub mod mount;
pub mod props;
pub mod tools;

pub use adapter::{CommandAdapter, MountAdapter, SystemCommands, SystemMounts};
pub use blkid::{BlockEntry, parse_blkid};
pub use bootimg::{BootImageHeader, extract_boot_image};
pub use cmd::CommandOutcome;
pub use error::{Result, SysError};
pub use loopdev::LoopAllocator;
pub use mount::MountFlags;
pub use tools::Toolbox;
