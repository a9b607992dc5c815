// SPDX-License-Identifier: GPL-3.0-only

//! Boot selection and final preparation
//!
//! [`BootSelector::run`] is the whole boot manager in one call: load the persisted status,
//! let the user pick a ROM (or continue the one a kexec handoff started), prepare it, save
//! the status and return the [`ExitPlan`] for the init trampoline.
//!
//! Once any mount or kexec work has started, a failure can no longer be reported back to
//! the menu. It ends in [`BootSelector::emergency`] instead, which always asks for a reboot
//! without unmounting anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use multiboot_sys::{kmsg, props};
use multiboot_types::{
    ExitAction, ExitPlan, Partition, PersistedStatus, Rom, RomFamily, RomId, RomType, Status,
    UiExit,
};
use tracing::{debug, error, info, warn};

use crate::context::BootContext;
use crate::error::{BootError, Result};
use crate::kexec::KexecPreparer;
use crate::monitor::{ChangeCallback, PartitionMonitor, PartitionScanner};
use crate::mounts::MountOrchestrator;
use crate::registry::RomRegistry;
use crate::ui::{BootUi, Notice};

pub const EMERGENCY_MESSAGE: &str = "An error occured.\n\
Shutting down MultiROM to avoid data corruption.\n\
Report this error to the developer!\n\
Debug info: /sdcard/multirom/error.txt\n\n\
Press POWER button to reboot.";

pub struct BootSelector<'a> {
    ctx: &'a BootContext,
    status: Status,
    monitor: PartitionMonitor,
    refresh_pending: Arc<AtomicBool>,
    tick: Duration,
}

impl<'a> BootSelector<'a> {
    pub fn new(ctx: &'a BootContext) -> Self {
        Self {
            ctx,
            status: Status::new(ctx.partitions.clone()),
            monitor: PartitionMonitor::new(ctx),
            refresh_pending: Arc::new(AtomicBool::new(false)),
            tick: ctx.config.boot.auto_boot_tick(),
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    /// Build the default status, then apply the persisted one on top of it.
    ///
    /// Only a failure to build the defaults is an error. Problems with the status file or
    /// the kernel command line leave the defaults in place.
    pub fn load_status(&mut self) -> Result<()> {
        info!("Loading MultiROM status...");
        let ctx = self.ctx;
        let boot = &ctx.config.boot;

        let mut status = Status::new(self.ctx.partitions.clone());
        RomRegistry::new(ctx).scan_internal(&mut status)?;
        let internal = status
            .find_rom(&boot.internal_rom_name, None)
            .map(|rom| rom.id)
            .ok_or(BootError::NoInternalRom)?;
        status.current_rom = Some(internal);
        self.status = status;

        if let Err(e) = props::read_cmdline(&ctx.config.paths.cmdline) {
            error!("Failed to read kernel command line: {}", e);
            return Ok(());
        }

        self.status.is_second_boot =
            kmsg::log_contains(&ctx.config.paths.last_kmsg, &boot.second_boot_marker);

        let path = ctx.status_path();
        let persisted = match PersistedStatus::load(&path) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => {
                debug!("No status file at {:?}, using defaults", path);
                return Ok(());
            }
            Err(e) => {
                warn!("Ignoring status file {:?}: {}", path, e);
                return Ok(());
            }
        };

        self.status.auto_boot_seconds = persisted.auto_boot_seconds;
        self.status.curr_rom_part = persisted.curr_rom_part.clone();

        if let Some(uuid) = persisted.curr_rom_part.as_deref()
            && self.status.is_second_boot
        {
            self.wait_for_partition(uuid);
        }

        if let Some(name) = persisted.current_rom.as_deref() {
            let found = self
                .status
                .find_rom(name, persisted.curr_rom_part.as_deref())
                .map(|rom| rom.id);
            match found {
                Some(id) => self.status.current_rom = Some(id),
                None => error!("Failed to select current ROM ({}), using Internal!", name),
            }
        }

        if let Some(name) = persisted.auto_boot_rom.as_deref() {
            self.status.auto_boot_rom = self.status.find_rom(name, None).map(|rom| rom.id);
            if self.status.auto_boot_rom.is_none() {
                error!("Could not find ROM {} to auto-boot", name);
            }
        }
        Ok(())
    }

    /// Rescan partitions until `uuid` shows up, then add its ROMs.
    pub fn wait_for_partition(&mut self, uuid: &str) -> Option<Arc<Partition>> {
        let ctx = self.ctx;
        let boot = &ctx.config.boot;
        let scanner = PartitionScanner::new(ctx);

        for attempt in 1..=boot.partition_wait_tries {
            if let Err(e) = scanner.scan() {
                warn!("Partition scan failed: {}", e);
            }
            if let Some(part) = ctx.partitions.find(uuid) {
                let found = RomRegistry::new(ctx).scan_partition(&mut self.status, &part);
                info!("Partition {} found after {} tries, {} ROMs", uuid, attempt, found);
                return Some(part);
            }
            if attempt < boot.partition_wait_tries {
                thread::sleep(boot.partition_wait_interval());
            }
        }

        error!("Partition {} did not appear", uuid);
        None
    }

    pub fn save_status(&self) -> Result<()> {
        info!("Saving multirom status");
        let name_of = |id: Option<RomId>| id.and_then(|id| self.status.rom(id)).map(|r| r.name.clone());

        let persisted = PersistedStatus {
            current_rom: name_of(self.status.current_rom)
                .or_else(|| Some(self.ctx.config.boot.internal_rom_name.clone())),
            auto_boot_seconds: self.status.auto_boot_seconds,
            auto_boot_rom: name_of(self.status.auto_boot_rom),
            curr_rom_part: self.status.curr_rom_part.clone(),
        };
        persisted.save(&self.ctx.status_path())?;
        Ok(())
    }

    /// Reject ROMs that cannot be booted on this device before any work starts.
    pub fn check_bootable(&self, rom: &Rom) -> Result<()> {
        if rom.rom_type.is_unsupported() {
            return Err(BootError::UnsupportedRomType);
        }

        if rom.needs_kexec() {
            if !KexecPreparer::new(self.ctx).has_kexec_hardboot() {
                return Err(BootError::KexecUnavailable);
            }
            if rom.name.contains(' ') {
                return Err(BootError::NameHasSpaces);
            }
        }

        if rom.rom_type == RomType::Unknown {
            return Err(BootError::UnknownRomType {
                name: rom.name.clone(),
                rom_type: rom.rom_type,
            });
        }
        Ok(())
    }

    /// Mount, link or kexec-load whatever `id` needs and compute the exit plan.
    pub fn prepare_for_boot(&mut self, id: RomId) -> Result<ExitPlan> {
        let rom = self
            .status
            .rom(id)
            .cloned()
            .ok_or_else(|| BootError::RomNotFound(id.to_string()))?;
        info!("Preparing {} ({}) for boot", rom.name, rom.rom_type);

        let mut plan = ExitPlan::new(ExitAction::BootCurrentKernel);
        if rom.needs_kexec() && !self.status.is_second_boot {
            KexecPreparer::new(self.ctx).load(&rom)?;
            plan.kexec_loaded = true;
        }

        match rom.rom_type.family() {
            RomFamily::Android if rom.rom_type != RomType::Default => {
                if !(plan.action.is_reboot() || plan.kexec_loaded) {
                    plan.unmount = false;
                }

                let orchestrator = MountOrchestrator::new(self.ctx);
                orchestrator.prepare_android_mounts(&rom)?;
                orchestrator.create_media_link()?;

                if let Some(part) = rom.partition() {
                    part.set_keep_mounted(true);
                }

                if !plan.kexec_loaded && !self.ctx.root_path("init.rc").exists() {
                    error!("Trying to boot android with ubuntu boot.img!");
                    return Err(BootError::UbuntuBootImage);
                }
            }
            RomFamily::Android | RomFamily::Ubuntu => {}
            RomFamily::Unsupported => return Err(BootError::UnsupportedRomType),
            RomFamily::Unknown => {
                return Err(BootError::UnknownRomType {
                    name: rom.name.clone(),
                    rom_type: rom.rom_type,
                });
            }
        }
        Ok(plan)
    }

    /// Rebuild removable ROMs if the monitor reported a change since the last call.
    pub fn refresh_if_pending(&mut self) -> Option<usize> {
        if !self.refresh_pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        let found = RomRegistry::new(self.ctx).scan_usb(&mut self.status);
        debug!("Refreshed removable ROMs, {} found", found);
        Some(found)
    }

    fn change_callback(&self) -> ChangeCallback {
        let pending = Arc::clone(&self.refresh_pending);
        Arc::new(move || pending.store(true, Ordering::Release))
    }

    /// Count down to the auto-boot ROM; `None` when there is none or the UI cancelled.
    pub fn run_auto_boot(&self, ui: &mut dyn BootUi) -> Option<RomId> {
        let rom = self.status.auto_boot()?;
        let seconds = u32::try_from(self.status.auto_boot_seconds).ok().filter(|s| *s > 0)?;

        for remaining in (1..=seconds).rev() {
            if !ui.auto_boot_tick(rom, remaining) {
                ui.notify(Notice::AutoBootCancelled);
                return None;
            }
            thread::sleep(self.tick);
        }
        info!("Auto-booting {}", rom.name);
        Some(rom.id)
    }

    /// Ask the UI until it returns a bootable ROM or another exit choice.
    fn select(&mut self, ui: &mut dyn BootUi) -> UiExit {
        let scanner = PartitionScanner::new(self.ctx);
        match scanner.scan() {
            Ok(count) => debug!("Found {} partitions", count),
            Err(e) => warn!("Partition scan failed: {}", e),
        }
        RomRegistry::new(self.ctx).scan_usb(&mut self.status);

        if let Some(id) = self.run_auto_boot(ui) {
            match self.status.rom(id).map(|rom| self.check_bootable(rom)) {
                Some(Ok(())) => return UiExit::BootRom(id),
                Some(Err(e)) => ui.show_error(&e.to_string()),
                None => {}
            }
        }

        if let Err(e) = self.monitor.start(self.change_callback()) {
            warn!("Failed to start partition monitor: {}", e);
        }

        let choice = loop {
            if let Some(removable) = self.refresh_if_pending() {
                ui.notify(Notice::RomsRefreshed { removable });
            }

            let Some(choice) = ui.select(&self.status) else {
                thread::sleep(self.ctx.config.monitor.poll_interval());
                continue;
            };

            if let UiExit::BootRom(id) = choice {
                let checked = match self.status.rom(id) {
                    Some(rom) => self.check_bootable(rom).map(|()| rom.name.clone()),
                    None => Err(BootError::RomNotFound(id.to_string())),
                };
                match checked {
                    Ok(name) => ui.notify(Notice::Booting { name }),
                    Err(e) => {
                        ui.show_error(&e.to_string());
                        continue;
                    }
                }
            }
            break choice;
        };

        self.monitor.stop();
        choice
    }

    /// Report an unrecoverable failure and ask for a plain reboot.
    pub fn emergency(&self, ui: &mut dyn BootUi, cause: &BootError) -> ExitPlan {
        error!("Emergency reboot: {}", cause);
        ui.show_error(EMERGENCY_MESSAGE);

        let log = self.ctx.error_log_path();
        if let Err(e) = kmsg::copy_log(&log) {
            warn!("Failed to copy kernel log to {:?}: {}", log, e);
        }
        ui.wait_for_acknowledgment();

        ExitPlan {
            action: ExitAction::Reboot,
            unmount: false,
            kexec_loaded: false,
        }
    }

    /// Run one boot: select, prepare, persist.
    pub fn run(&mut self, ui: &mut dyn BootUi) -> Result<ExitPlan> {
        self.load_status()?;
        dump_status(&self.status);

        let was_second_boot = self.status.is_second_boot;
        let mut plan = ExitPlan::reboot();
        let to_boot = if was_second_boot {
            info!("Skipping ROM selection because of second boot");
            if let Some(rom) = self.status.current() {
                ui.notify(Notice::SecondBoot {
                    name: rom.name.clone(),
                });
            }
            self.status.current_rom
        } else {
            // Probe now so the menu never waits on it.
            KexecPreparer::new(self.ctx).has_kexec_hardboot();
            match self.select(ui) {
                UiExit::BootRom(id) => Some(id),
                other => {
                    info!("Exiting with {:?}", other);
                    plan = other.exit_plan().unwrap_or_default();
                    None
                }
            }
        };

        if let Some(id) = to_boot {
            plan = match self.prepare_for_boot(id) {
                Ok(plan) => plan,
                Err(e) => return Ok(self.emergency(ui, &e)),
            };

            let (android, part_uuid) = self
                .status
                .rom(id)
                .map(|rom| (rom.rom_type.is_android(), rom.partition_uuid()))
                .unwrap_or((false, None));
            self.status.is_second_boot = !was_second_boot && android && plan.kexec_loaded;
            self.status.curr_rom_part = part_uuid;
            self.status.current_rom = Some(id);
        }

        if let Err(e) = self.save_status() {
            error!("Failed to save status: {}", e);
        }
        PartitionScanner::new(self.ctx).release();
        Ok(plan)
    }
}

/// Log the loaded status at debug level.
fn dump_status(status: &Status) {
    let name_of = |id: Option<RomId>| {
        id.and_then(|id| status.rom(id))
            .map_or("NULL", |rom| rom.name.as_str())
    };
    debug!("Dumping multirom status:");
    debug!("  is_second_boot={}", status.is_second_boot);
    debug!("  current_rom={}", name_of(status.current_rom));
    debug!("  auto_boot_seconds={}", status.auto_boot_seconds);
    debug!("  auto_boot_rom={}", name_of(status.auto_boot_rom));
    debug!("  curr_rom_part={}", status.curr_rom_part.as_deref().unwrap_or("NULL"));
    for rom in &status.roms {
        debug!(
            "  ROM {}: {} ({}), bootimg {}, partition {}",
            rom.id,
            rom.name,
            rom.rom_type,
            rom.has_bootimg,
            rom.partition_uuid().as_deref().unwrap_or("none")
        );
    }
}
