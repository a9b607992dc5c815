// SPDX-License-Identifier: GPL-3.0-only

//! Partition models and the shared partition list

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// A block device partition discovered by the hot-plug monitor
#[derive(Debug)]
pub struct Partition {
    /// Kernel device name (e.g., "sda1")
    pub name: String,

    /// Filesystem UUID as reported by `blkid`
    pub uuid: String,

    /// Filesystem type (e.g., "ext4", "vfat", "ntfs")
    pub fs_type: String,

    /// Where the partition is mounted; `None` until mounted
    mount_path: Option<PathBuf>,

    /// Set while the partition backs the ROM being booted
    keep_mounted: AtomicBool,
}

impl Partition {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>, fs_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            fs_type: fs_type.into(),
            mount_path: None,
            keep_mounted: AtomicBool::new(false),
        }
    }

    pub fn with_mount_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_path = Some(path.into());
        self
    }

    pub fn mount_path(&self) -> Option<&Path> {
        self.mount_path.as_deref()
    }

    pub fn keep_mounted(&self) -> bool {
        self.keep_mounted.load(Ordering::Acquire)
    }

    pub fn set_keep_mounted(&self, keep: bool) {
        self.keep_mounted.store(keep, Ordering::Release);
    }

    pub fn is_ntfs(&self) -> bool {
        self.fs_type.contains("ntfs")
    }

    pub fn is_ext(&self) -> bool {
        self.fs_type.contains("ext")
    }

    /// Device node path under the given block directory
    pub fn device_path(&self, block_dir: &Path) -> PathBuf {
        block_dir.join(&self.name)
    }
}

impl Serialize for Partition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Partition", 5)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("uuid", &self.uuid)?;
        state.serialize_field("fs_type", &self.fs_type)?;
        state.serialize_field("mount_path", &self.mount_path)?;
        state.serialize_field("keep_mounted", &self.keep_mounted())?;
        state.end()
    }
}

/// Partition list shared between the control thread and the hot-plug monitor.
///
/// Cloning the table clones the handle; all clones guard the same list with one mutex.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    inner: Arc<Mutex<Vec<Arc<Partition>>>>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock for a multi-step read or replace.
    pub fn lock(&self) -> MutexGuard<'_, Vec<Arc<Partition>>> {
        // A panicked writer leaves a list of fully-built partitions behind; keep using it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<Arc<Partition>> {
        self.lock().clone()
    }

    pub fn find(&self, uuid: &str) -> Option<Arc<Partition>> {
        self.lock().iter().find(|p| p.uuid == uuid).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Swap in a new list, returning the previous one.
    pub fn replace(&self, partitions: Vec<Arc<Partition>>) -> Vec<Arc<Partition>> {
        std::mem::replace(&mut *self.lock(), partitions)
    }
}
