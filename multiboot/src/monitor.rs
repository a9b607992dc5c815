// SPDX-License-Identifier: GPL-3.0-only

//! Partition discovery and hot-plug monitoring
//!
//! [`PartitionScanner::scan`] runs `busybox blkid`, mounts every removable partition
//! under the mount root and swaps the result into the shared [`PartitionTable`].
//! [`PartitionMonitor`] repeats that on a background thread whenever the block device
//! directory changes, waiting for a quiet period so a burst of device nodes from one
//! plugged drive produces a single rescan.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use multiboot_sys::{BlockEntry, CommandAdapter, MountAdapter, MountFlags, Toolbox, fsutil, parse_blkid};
use multiboot_types::{Partition, PartitionTable};
use tracing::{debug, error, info, warn};

use crate::context::BootContext;
use crate::error::Result;

/// Invoked on the monitor thread after each hot-plug rescan
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct PartitionScanner {
    commands: Arc<dyn CommandAdapter>,
    mounts: Arc<dyn MountAdapter>,
    toolbox: Toolbox,
    block_dir: PathBuf,
    mount_root: PathBuf,
    internal_prefix: String,
    table: PartitionTable,
}

impl PartitionScanner {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            commands: Arc::clone(&ctx.commands),
            mounts: Arc::clone(&ctx.mounts),
            toolbox: ctx.toolbox.clone(),
            block_dir: ctx.config.paths.block_dir.clone(),
            mount_root: ctx.config.paths.mount_root.clone(),
            internal_prefix: ctx.config.boot.internal_block_prefix.clone(),
            table: ctx.partitions.clone(),
        }
    }

    /// Enumerate block devices and replace the partition list; returns the new count.
    pub fn scan(&self) -> Result<usize> {
        let busybox = self.toolbox.busybox()?;
        let outcome = self.commands.run(busybox, &["blkid".to_string()])?;
        Ok(self.apply(parse_blkid(&outcome.stdout)))
    }

    /// Replace the partition list with `entries`, under the table lock.
    ///
    /// Previous partitions are unmounted first unless they are marked `keep_mounted`; a
    /// kept partition that shows up again is carried over as-is rather than remounted.
    pub fn apply(&self, entries: Vec<BlockEntry>) -> usize {
        let mut guard = self.table.lock();
        let previous = std::mem::take(&mut *guard);

        let mut kept = Vec::new();
        for part in previous {
            if part.keep_mounted() {
                kept.push(part);
            } else if let Some(path) = part.mount_path() {
                if let Err(e) = self.mounts.unmount(path) {
                    warn!("Failed to unmount {:?}: {}", path, e);
                }
            }
        }

        for entry in entries {
            if let Some(pos) = kept.iter().position(|p| p.uuid == entry.uuid) {
                let part = kept.swap_remove(pos);
                debug!("Keeping mounted part {}: {}, {}", part.name, part.uuid, part.fs_type);
                guard.push(part);
                continue;
            }

            match self.build(&entry) {
                Ok(part) => {
                    info!("Found part {}: {}, {}", part.name, part.uuid, part.fs_type);
                    guard.push(Arc::new(part));
                }
                Err(e) => error!(
                    "Failed to mount part {} {}, {}: {}",
                    entry.name, entry.uuid, entry.fs_type, e
                ),
            }
        }

        guard.len()
    }

    /// Unmount every partition not marked `keep_mounted` and empty the list.
    pub fn release(&self) {
        let mut guard = self.table.lock();
        for part in std::mem::take(&mut *guard) {
            if part.keep_mounted() {
                continue;
            }
            if let Some(path) = part.mount_path()
                && let Err(e) = self.mounts.unmount(path)
            {
                warn!("Failed to unmount {:?}: {}", path, e);
            }
        }
    }

    fn build(&self, entry: &BlockEntry) -> Result<Partition> {
        let part = Partition::new(&entry.name, &entry.uuid, &entry.fs_type);

        // Internal storage is already mounted by the boot environment.
        if entry.name.contains(&self.internal_prefix) {
            return Ok(part);
        }

        let target = self.mount_root.join(&entry.name);
        fsutil::mkdir_recursive(&target, 0o777)?;
        let source = part.device_path(&self.block_dir);

        if part.is_ntfs() {
            let ntfs = self.toolbox.ntfs()?;
            self.commands.run(
                ntfs,
                &[
                    source.display().to_string(),
                    target.display().to_string(),
                ],
            )?;
        } else {
            self.mounts
                .mount(&source, &target, &part.fs_type, MountFlags::NOATIME)?;
        }

        Ok(part.with_mount_path(target))
    }
}

/// Coalesces bursts of block-directory changes into one rescan
#[derive(Debug, Clone)]
pub struct Debouncer {
    settle: Duration,
    idle: Duration,
    last_stamp: Option<SystemTime>,
    pending: bool,
}

impl Debouncer {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            idle: Duration::ZERO,
            last_stamp: None,
            pending: false,
        }
    }

    /// Feed one poll result; returns true when a rescan should run now.
    ///
    /// `elapsed` is the time since the previous observation. The first stamp seen is the
    /// baseline, since callers scan once before watching.
    pub fn observe(&mut self, stamp: Option<SystemTime>, elapsed: Duration) -> bool {
        if stamp.is_some() && stamp != self.last_stamp {
            let baseline = self.last_stamp.is_none();
            self.last_stamp = stamp;
            if !baseline {
                self.pending = true;
                self.idle = Duration::ZERO;
            }
            return false;
        }

        if !self.pending {
            return false;
        }

        self.idle += elapsed;
        if self.idle >= self.settle {
            self.pending = false;
            self.idle = Duration::ZERO;
            return true;
        }
        false
    }
}

/// Background hot-plug watcher; start and stop are idempotent
pub struct PartitionMonitor {
    scanner: PartitionScanner,
    poll_interval: Duration,
    settle: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PartitionMonitor {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            scanner: PartitionScanner::new(ctx),
            poll_interval: ctx.config.monitor.poll_interval(),
            settle: ctx.config.monitor.settle(),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&self, on_change: ChangeCallback) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let scanner = self.scanner.clone();
        let poll = self.poll_interval;
        let mut debouncer = Debouncer::new(self.settle);

        let spawned = thread::Builder::new()
            .name("partition-monitor".to_string())
            .spawn(move || {
                debug!("Partition monitor started");
                while running.load(Ordering::Acquire) {
                    let stamp = fs::metadata(&scanner.block_dir)
                        .and_then(|m| m.modified())
                        .ok();

                    if debouncer.observe(stamp, poll) {
                        match scanner.scan() {
                            Ok(count) => debug!("Hot-plug rescan found {} partitions", count),
                            Err(e) => warn!("Hot-plug rescan failed: {}", e),
                        }
                        on_change();
                    }
                    thread::sleep(poll);
                }
                debug!("Partition monitor stopped");
            });

        match spawned {
            Ok(join) => {
                *handle = Some(join);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub fn stop(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        let Some(join) = handle.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        if join.join().is_err() {
            error!("Partition monitor thread panicked");
        }
    }
}

impl Drop for PartitionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
