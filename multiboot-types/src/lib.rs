// SPDX-License-Identifier: GPL-3.0-only

//! Canonical data model for the multiboot orchestrator
//!
//! Every layer shares these types:
//!
//! - **multiboot-sys**: low-level helpers fill in [`Partition`] data from `blkid`
//! - **multiboot**: the registry, mount orchestrator and boot selector operate on
//!   [`Status`], [`Rom`] and [`ExitPlan`]
//!
//! ## Ownership
//!
//! [`Status`] is the aggregate root. It owns the ROM list and shares the partition list
//! with the hot-plug monitor through a [`PartitionTable`]. ROMs only hold weak references
//! to the partition they live on, so dropping a partition from the table never dangles.

pub mod exit;
pub mod partition;
pub mod rom;
pub mod status;
pub mod status_file;

pub use exit::{ExitAction, ExitPlan, UiExit};
pub use partition::{Partition, PartitionTable};
pub use rom::{Rom, RomFamily, RomId, RomType, collate_names};
pub use status::Status;
pub use status_file::{PersistedStatus, StatusFileError};
