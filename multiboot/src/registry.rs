// SPDX-License-Identifier: GPL-3.0-only

//! ROM discovery and layout classification

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use multiboot_sys::fsutil;
use multiboot_types::{Partition, Rom, RomType, Status, collate_names};
use tracing::{debug, error, info, warn};

use crate::context::BootContext;
use crate::error::Result;

/// Directory on a removable partition holding its ROMs
pub const PARTITION_ROMS_DIR: &str = "multirom";

fn has(base: &Path, child: &str) -> bool {
    base.join(child).exists()
}

/// Classify a ROM directory by the marker paths under `base`.
///
/// Depends only on the directory layout, the ROM name and whether it lives on a partition.
pub fn classify(base: &Path, name: &str, on_partition: bool, internal_name: &str) -> RomType {
    if !on_partition && name == internal_name {
        return RomType::Default;
    }

    if has(base, "boot") {
        if has(base, "system") && has(base, "data") && has(base, "cache") {
            return if on_partition {
                RomType::AndroidUsbDir
            } else {
                RomType::AndroidInternal
            };
        }
        if has(base, "system.img") && has(base, "data.img") && has(base, "cache.img") {
            return RomType::AndroidUsbImg;
        }
    }

    if has(base, "root") {
        let legacy = has(base, "boot.img");
        return match (legacy, on_partition) {
            (false, false) => RomType::UbuntuInternal,
            (false, true) => RomType::UbuntuUsbDir,
            (true, false) => RomType::UnsupportedInternal,
            (true, true) => RomType::UnsupportedUsb,
        };
    }

    if on_partition && has(base, "root.img") {
        return RomType::UbuntuUsbImg;
    }

    RomType::Unknown
}

pub struct RomRegistry<'a> {
    ctx: &'a BootContext,
}

impl<'a> RomRegistry<'a> {
    pub fn new(ctx: &'a BootContext) -> Self {
        Self { ctx }
    }

    /// Candidate ROMs in `dir`, sorted for display.
    fn candidates(&self, dir: &Path, partition: Option<&Arc<Partition>>) -> Result<Vec<Rom>> {
        let boot = &self.ctx.config.boot;
        let mut roms = Vec::new();

        for entry in fs::read_dir(dir)?.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping ROM with non UTF-8 name in {:?}", dir);
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if name.chars().count() > boot.max_rom_name_len {
                error!(
                    "Skipping ROM {}, name is too long (max {} chars allowed)",
                    name, boot.max_rom_name_len
                );
                continue;
            }

            let base_path = dir.join(&name);
            let rom_type = classify(
                &base_path,
                &name,
                partition.is_some(),
                &boot.internal_rom_name,
            );
            debug!("Adding ROM {} ({})", name, rom_type);

            roms.push(Rom {
                id: self.ctx.next_rom_id(),
                has_bootimg: base_path.join("boot.img").is_file(),
                name,
                base_path,
                rom_type,
                partition: partition.map(Arc::downgrade),
            });
        }

        roms.sort_by(|a, b| collate_names(&a.name, &b.name));
        Ok(roms)
    }

    /// Scan the internal ROMs directory, importing the running system first if needed.
    pub fn scan_internal(&self, status: &mut Status) -> Result<usize> {
        if !self.ctx.internal_rom_dir().is_dir() {
            error!("Failed to open Internal ROM's folder, creating one with ROM from internal memory...");
            self.import_internal()?;
        }

        let roms = self.candidates(&self.ctx.roms_dir(), None)?;
        let count = roms.len();
        status.add_roms(roms);
        Ok(count)
    }

    /// Seed the internal ROM from the active boot partition.
    pub fn import_internal(&self) -> Result<PathBuf> {
        fsutil::mkdir_with_perms(self.ctx.base_dir(), 0o777, None)?;
        fsutil::mkdir_with_perms(&self.ctx.roms_dir(), 0o777, None)?;
        let internal = self.ctx.internal_rom_dir();
        fsutil::mkdir_with_perms(&internal, 0o777, None)?;

        let image = internal.join("boot.img");
        info!("Dumping boot image to {:?}", image);
        let busybox = self.ctx.toolbox.busybox()?;
        self.ctx.commands.run(
            busybox,
            &[
                "dd".to_string(),
                format!("if={}", self.ctx.config.paths.boot_block.display()),
                format!("of={}", image.display()),
            ],
        )?;
        Ok(image)
    }

    /// Add the ROMs under `<mount>/multirom` of one mounted partition.
    pub fn scan_partition(&self, status: &mut Status, part: &Arc<Partition>) -> usize {
        let Some(mount) = part.mount_path() else {
            return 0;
        };
        let dir = mount.join(PARTITION_ROMS_DIR);
        if !dir.is_dir() {
            return 0;
        }

        match self.candidates(&dir, Some(part)) {
            Ok(roms) => {
                let count = roms.len();
                status.add_roms(roms);
                count
            }
            Err(e) => {
                warn!("Failed to scan {:?}: {}", dir, e);
                0
            }
        }
    }

    /// Rebuild every removable-media ROM from the current partition list.
    pub fn scan_usb(&self, status: &mut Status) -> usize {
        let removed = status.remove_usb_roms();
        debug!("Removed {} removable ROMs", removed);

        let prefix = &self.ctx.config.boot.internal_block_prefix;
        let parts = self.ctx.partitions.lock();
        parts
            .iter()
            .filter(|part| !part.name.contains(prefix.as_str()))
            .map(|part| self.scan_partition(status, part))
            .sum()
    }

    /// The internal partition holding `/data`
    pub fn data_partition(&self) -> Option<Arc<Partition>> {
        let prefix = &self.ctx.config.boot.internal_block_prefix;
        self.ctx
            .partitions
            .lock()
            .iter()
            .find(|part| part.name.starts_with(prefix.as_str()) && part.fs_type.starts_with("ext"))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use multiboot_sys::Toolbox;

    use super::*;
    use crate::config::Config;
    use crate::testing::{RecordingCommands, RecordingMounts, TempDir};

    fn context(temp: &TempDir) -> (BootContext, Arc<RecordingCommands>) {
        let commands = Arc::new(RecordingCommands::default());
        let ctx = BootContext::with_adapters(
            Config::default(),
            temp.join("multirom"),
            Toolbox::with_paths("/mr/busybox".into(), "/mr/kexec".into(), "/mr/ntfs-3g".into()),
            Arc::new(RecordingMounts::default()),
            commands.clone(),
        );
        (ctx, commands)
    }

    fn classify_layout(entries: &[&str], name: &str, on_partition: bool) -> RomType {
        let temp = TempDir::new("classify");
        temp.layout(entries);
        classify(&temp.path, name, on_partition, "Internal")
    }

    #[test]
    fn internal_name_without_partition_is_default() {
        assert_eq!(classify_layout(&["root"], "Internal", false), RomType::Default);
        assert_eq!(classify_layout(&["root"], "Internal", true), RomType::UbuntuUsbDir);
    }

    #[test]
    fn android_layouts() {
        let dirs = ["boot", "system", "data", "cache"];
        assert_eq!(classify_layout(&dirs, "cm10", false), RomType::AndroidInternal);
        assert_eq!(classify_layout(&dirs, "cm10", true), RomType::AndroidUsbDir);

        let images = ["boot", "system.img", "data.img", "cache.img"];
        assert_eq!(classify_layout(&images, "aosp", true), RomType::AndroidUsbImg);

        // Incomplete sets fall through to the remaining checks.
        assert_eq!(classify_layout(&["boot", "system", "data"], "x", false), RomType::Unknown);
    }

    #[test]
    fn ubuntu_layouts() {
        assert_eq!(classify_layout(&["root"], "ubuntu", false), RomType::UbuntuInternal);
        assert_eq!(classify_layout(&["root"], "ubuntu", true), RomType::UbuntuUsbDir);
        assert_eq!(
            classify_layout(&["root", "boot.img"], "quantal", false),
            RomType::UnsupportedInternal
        );
        assert_eq!(
            classify_layout(&["root", "boot.img"], "quantal", true),
            RomType::UnsupportedUsb
        );
        assert_eq!(classify_layout(&["root.img"], "raring", true), RomType::UbuntuUsbImg);
        assert_eq!(classify_layout(&["root.img"], "raring", false), RomType::Unknown);
        assert_eq!(classify_layout(&[], "empty", false), RomType::Unknown);
    }

    #[test]
    fn classification_is_stable() {
        let temp = TempDir::new("stable");
        temp.layout(&["boot", "system.img", "data.img", "cache.img"]);
        let first = classify(&temp.path, "rom", true, "Internal");
        let second = classify(&temp.path, "rom", true, "Internal");
        assert_eq!(first, second);
    }

    #[test]
    fn internal_scan_sorts_and_filters() {
        let temp = TempDir::new("scan-internal");
        temp.layout(&[
            "multirom/roms/Internal",
            "multirom/roms/ubuntu/root",
            "multirom/roms/cm12/boot",
            "multirom/roms/Aosp/boot",
            "multirom/roms/.hidden",
            "multirom/roms/this-name-is-far-too-long-for-a-rom",
        ]);
        fs::write(temp.join("multirom/roms/cm12/boot.img"), b"ANDROID!").expect("write");
        fs::write(temp.join("multirom/roms/notes.txt"), b"x").expect("write");

        let (ctx, commands) = context(&temp);
        let mut status = Status::new(ctx.partitions.clone());
        let count = RomRegistry::new(&ctx).scan_internal(&mut status).expect("scan");

        let names: Vec<_> = status.roms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(count, 4);
        assert_eq!(names, ["Aosp", "cm12", "Internal", "ubuntu"]);
        assert_eq!(status.roms[2].rom_type, RomType::Default);
        assert!(status.roms[1].has_bootimg);
        assert!(commands.calls().is_empty());

        let mut ids: Vec<_> = status.roms.iter().map(|r| r.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn missing_internal_rom_is_imported() {
        let temp = TempDir::new("import");
        let (ctx, commands) = context(&temp);
        let mut status = Status::new(ctx.partitions.clone());

        RomRegistry::new(&ctx).scan_internal(&mut status).expect("scan");

        let internal = temp.join("multirom/roms/Internal");
        assert!(internal.is_dir());
        assert_eq!(
            commands.calls(),
            vec![format!(
                "/mr/busybox dd if=/dev/block/mmcblk0p2 of={}",
                internal.join("boot.img").display()
            )]
        );
        assert_eq!(status.roms.len(), 1);
        assert_eq!(status.roms[0].rom_type, RomType::Default);
    }

    #[test]
    fn usb_scan_replaces_removable_roms() {
        let temp = TempDir::new("scan-usb");
        temp.layout(&[
            "multirom/roms/Internal",
            "sda1/multirom/ubuntu/root",
            "sda1/multirom/cm10/boot",
            "sda1/multirom/cm10/system.img",
            "sda1/multirom/cm10/data.img",
            "sda1/multirom/cm10/cache.img",
            "mmcblk0p9/multirom/ghost/root",
        ]);
        let (ctx, _) = context(&temp);
        ctx.partitions.replace(vec![
            Arc::new(Partition::new("mmcblk0p9", "1111", "ext4").with_mount_path(temp.join("mmcblk0p9"))),
            Arc::new(Partition::new("sda1", "ABCD", "ext4").with_mount_path(temp.join("sda1"))),
        ]);

        let registry = RomRegistry::new(&ctx);
        let mut status = Status::new(ctx.partitions.clone());
        registry.scan_internal(&mut status).expect("internal");

        assert_eq!(registry.scan_usb(&mut status), 2);
        assert_eq!(registry.scan_usb(&mut status), 2);
        assert_eq!(status.roms.len(), 3);

        let cm10 = status.find_rom("cm10", Some("ABCD")).expect("cm10");
        assert_eq!(cm10.rom_type, RomType::AndroidUsbImg);
        assert!(status.find_rom("ghost", None).is_none());

        assert_eq!(registry.data_partition().map(|p| p.uuid.clone()), Some("1111".to_string()));
    }
}
