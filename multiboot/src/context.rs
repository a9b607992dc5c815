// SPDX-License-Identifier: GPL-3.0-only

//! Per-run state shared by every component
//!
//! One [`BootContext`] is created per process and passed by reference to the registry,
//! monitor, mount orchestrator and kexec preparer. Nothing in this crate keeps process-wide
//! mutable state, so tests build as many independent contexts as they need.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use multiboot_sys::{
    CommandAdapter, LoopAllocator, MountAdapter, SystemCommands, SystemMounts, Toolbox,
};
use multiboot_types::{PartitionTable, RomId};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{BootError, Result};

pub struct BootContext {
    pub config: Config,
    base_dir: PathBuf,
    pub toolbox: Toolbox,
    pub mounts: Arc<dyn MountAdapter>,
    pub commands: Arc<dyn CommandAdapter>,
    /// The one lock-protected partition list; the monitor thread holds a clone
    pub partitions: PartitionTable,
    loops: LoopAllocator,
    next_rom_id: AtomicU32,
    kexec_hardboot: OnceLock<bool>,
}

impl BootContext {
    /// Locate the base directory and wire up the real syscall and subprocess adapters.
    pub fn discover(config: Config) -> Result<Self> {
        let base_dir = find_base_dir(&config.paths.base_dir_candidates)?;
        info!("Using base directory {:?}", base_dir);

        let toolbox = Toolbox::discover(&base_dir);
        let mounts = Arc::new(SystemMounts::new(&config.paths.loop_dev_dir));
        Ok(Self::with_adapters(
            config,
            base_dir,
            toolbox,
            mounts,
            Arc::new(SystemCommands),
        ))
    }

    pub fn with_adapters(
        config: Config,
        base_dir: PathBuf,
        toolbox: Toolbox,
        mounts: Arc<dyn MountAdapter>,
        commands: Arc<dyn CommandAdapter>,
    ) -> Self {
        Self {
            config,
            base_dir,
            toolbox,
            mounts,
            commands,
            partitions: PartitionTable::new(),
            loops: LoopAllocator::new(),
            next_rom_id: AtomicU32::new(0),
            kexec_hardboot: OnceLock::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn roms_dir(&self) -> PathBuf {
        self.base_dir.join("roms")
    }

    pub fn internal_rom_dir(&self) -> PathBuf {
        self.roms_dir().join(&self.config.boot.internal_rom_name)
    }

    pub fn status_path(&self) -> PathBuf {
        self.base_dir.join("multirom.ini")
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.base_dir.join("error.txt")
    }

    /// `path` resolved under the filesystem root the chosen ROM will boot into.
    pub fn root_path(&self, path: &str) -> PathBuf {
        self.config.paths.root.join(path.trim_start_matches('/'))
    }

    /// Mount point of a loop-mounted Ubuntu image.
    pub fn image_mount_path(&self) -> PathBuf {
        self.config.paths.mount_root.join("image")
    }

    pub fn next_rom_id(&self) -> RomId {
        RomId(self.next_rom_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_loop_index(&self) -> u32 {
        self.loops.allocate()
    }

    /// Memoized kernel capability probe.
    pub fn kexec_hardboot(&self, probe: impl FnOnce() -> bool) -> bool {
        *self.kexec_hardboot.get_or_init(|| {
            let supported = probe();
            debug!("Kexec-hardboot support: {}", supported);
            supported
        })
    }
}

fn find_base_dir(candidates: &[PathBuf]) -> Result<PathBuf> {
    candidates
        .iter()
        .find(|dir| dir.is_dir())
        .cloned()
        .ok_or(BootError::NoBaseDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingCommands, RecordingMounts};

    fn context(root: &str) -> BootContext {
        let mut config = Config::default();
        config.paths.root = PathBuf::from(root);
        BootContext::with_adapters(
            config,
            PathBuf::from("/mr"),
            Toolbox::default(),
            Arc::new(RecordingMounts::default()),
            Arc::new(RecordingCommands::default()),
        )
    }

    #[test]
    fn derived_paths() {
        let ctx = context("/target");
        assert_eq!(ctx.roms_dir(), PathBuf::from("/mr/roms"));
        assert_eq!(ctx.internal_rom_dir(), PathBuf::from("/mr/roms/Internal"));
        assert_eq!(ctx.status_path(), PathBuf::from("/mr/multirom.ini"));
        assert_eq!(ctx.root_path("/system"), PathBuf::from("/target/system"));
        assert_eq!(ctx.root_path("init.rc"), PathBuf::from("/target/init.rc"));
        assert_eq!(ctx.image_mount_path(), PathBuf::from("/mnt/image"));
    }

    #[test]
    fn ids_are_unique_per_context() {
        let first = context("/");
        let second = context("/");

        assert_eq!(first.next_rom_id(), RomId(0));
        assert_eq!(first.next_rom_id(), RomId(1));
        assert_eq!(second.next_rom_id(), RomId(0));

        assert_eq!(first.next_loop_index(), 0);
        assert_eq!(first.next_loop_index(), 1);
        assert_eq!(second.next_loop_index(), 0);
    }

    #[test]
    fn capability_probe_runs_once() {
        let ctx = context("/");
        assert!(ctx.kexec_hardboot(|| true));
        assert!(ctx.kexec_hardboot(|| false));
    }

    #[test]
    fn base_dir_is_first_existing_candidate() {
        let candidates = vec![
            PathBuf::from("/nonexistent/multirom"),
            std::env::temp_dir(),
        ];
        assert_eq!(find_base_dir(&candidates).expect("found"), std::env::temp_dir());
        assert!(matches!(
            find_base_dir(&candidates[..1]),
            Err(BootError::NoBaseDir)
        ));
    }
}
