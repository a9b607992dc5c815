// SPDX-License-Identifier: GPL-3.0-only

//! Multi-boot orchestrator
//!
//! Runs early in the boot of a device, before the installed system starts. It finds the
//! ROMs stored in internal memory and on removable media, lets the user pick one and
//! prepares it: either by bind- or loop-mounting its filesystems in place, or by loading
//! its kernel with kexec. The outcome is an [`ExitPlan`] the init trampoline acts on.
//!
//! [`BootSelector`] drives everything; the other modules are its collaborators and are
//! usable on their own, which is what the `status`, `partitions` and `classify`
//! subcommands of the binary do.

pub mod config;
pub mod context;
pub mod error;
pub mod initrc;
pub mod kexec;
pub mod logging;
pub mod monitor;
pub mod mounts;
pub mod registry;
pub mod selector;
pub mod ui;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use context::BootContext;
pub use error::{BootError, Result};
pub use multiboot_types::{ExitAction, ExitPlan, Rom, RomType, Status, UiExit};
pub use selector::BootSelector;
pub use ui::{BootUi, ConsoleUi, Notice};
