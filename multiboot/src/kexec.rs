// SPDX-License-Identifier: GPL-3.0-only

//! Kernel handoff preparation
//!
//! A [`KexecPlan`] holds everything the kexec loader needs for one ROM family:
//! - Android: kernel and ramdisk are cut out of the ROM's `boot.img` into the root, and the
//!   image's own command line is appended to the running one.
//! - Ubuntu: kernel and initrd are picked from the ROM's `/boot`, which may live inside a
//!   loop-mounted `root.img`; the command line tells the initramfs where the root is.

use std::path::{Path, PathBuf};

use multiboot_sys::{MountFlags, extract_boot_image, fsutil, kmsg, props};
use multiboot_types::{Partition, Rom, RomFamily};
use tracing::{debug, error, info, warn};

use crate::context::BootContext;
use crate::error::{BootError, Result};
use crate::monitor::PartitionScanner;
use crate::mounts::MountOrchestrator;
use crate::registry::RomRegistry;

const HARDBOOT_OPTION: &str = "CONFIG_KEXEC_HARDBOOT=y";
const UBUNTU_FLAGS: &str = "rw console=tty1 fbcon=rotate:1 access=m2 quiet splash";
const UBUNTU_ROOTFLAGS: &str = "rootflags=defaults,noatime,nodiratime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KexecPlan {
    Android {
        kernel: PathBuf,
        initrd: PathBuf,
        cmdline: String,
    },
    Ubuntu {
        kernel: PathBuf,
        initrd: PathBuf,
        cmdline: String,
        /// Where `root.img` was loop-mounted to reach the kernel, if it was
        image_mount: Option<PathBuf>,
    },
}

impl KexecPlan {
    pub fn family(&self) -> RomFamily {
        match self {
            Self::Android { .. } => RomFamily::Android,
            Self::Ubuntu { .. } => RomFamily::Ubuntu,
        }
    }

    pub fn image_mount(&self) -> Option<&Path> {
        match self {
            Self::Android { .. } => None,
            Self::Ubuntu { image_mount, .. } => image_mount.as_deref(),
        }
    }

    /// Arguments for `kexec`, in the order the hardboot loader expects.
    pub fn loader_args(&self, mem_min: &str) -> Vec<String> {
        let (kernel, initrd, cmdline) = match self {
            Self::Android {
                kernel,
                initrd,
                cmdline,
            }
            | Self::Ubuntu {
                kernel,
                initrd,
                cmdline,
                ..
            } => (kernel, initrd, cmdline),
        };

        vec![
            "--load-hardboot".to_string(),
            kernel.display().to_string(),
            format!("--mem-min={mem_min}"),
            format!("--initrd={}", initrd.display()),
            format!("--command-line={cmdline}"),
        ]
    }
}

pub fn android_cmdline(device_cmdline: &str, marker_arg: &str, image_cmdline: &str) -> String {
    format!("{device_cmdline} {marker_arg} {image_cmdline}")
}

/// Root device and location arguments for an Ubuntu initramfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbuntuRoot {
    pub root: String,
    pub location: String,
    pub ntfs: bool,
}

impl UbuntuRoot {
    /// Root inside the real data partition, addressed by device node.
    pub fn internal(device: &str, base_path: &Path, realdata: &Path) -> Self {
        let relative = base_path.strip_prefix(realdata).unwrap_or(base_path);
        Self {
            root: device.to_string(),
            location: format!("rootsubdir={}/root", absolute(relative)),
            ntfs: false,
        }
    }

    /// Root on a removable partition, addressed by UUID.
    pub fn removable(part: &Partition, base_path: &Path) -> Self {
        let relative = part
            .mount_path()
            .and_then(|mount| base_path.strip_prefix(mount).ok())
            .unwrap_or(base_path);
        let relative = absolute(relative);

        let location = if part.is_ext() {
            format!("rootsubdir={relative}/root")
        } else {
            format!("loop={relative}/root.img loopfstype=ext4")
        };

        Self {
            root: format!("UUID={}", part.uuid),
            location,
            ntfs: part.is_ntfs(),
        }
    }

    pub fn cmdline(&self, device_cmdline: &str, marker_arg: &str) -> String {
        let mut cmdline = format!(
            "{device_cmdline} root={} {UBUNTU_FLAGS} {marker_arg} {UBUNTU_ROOTFLAGS} {}",
            self.root, self.location
        );
        if self.ntfs {
            cmdline.push_str(" rootfstype=ntfs-3g");
        }
        cmdline
    }
}

fn absolute(relative: &Path) -> String {
    let rendered = relative.display().to_string();
    if rendered.starts_with('/') {
        rendered
    } else {
        format!("/{rendered}")
    }
}

pub struct KexecPreparer<'a> {
    ctx: &'a BootContext,
}

impl<'a> KexecPreparer<'a> {
    pub fn new(ctx: &'a BootContext) -> Self {
        Self { ctx }
    }

    /// Whether the running kernel was built with kexec-hardboot; probed once per context.
    pub fn has_kexec_hardboot(&self) -> bool {
        self.ctx.kexec_hardboot(|| self.probe_hardboot())
    }

    fn probe_hardboot(&self) -> bool {
        let config = &self.ctx.config.paths.kernel_config;
        if !config.exists() {
            debug!("{:?} not found", config);
            return false;
        }

        let Ok(busybox) = self.ctx.toolbox.busybox() else {
            warn!("Cannot read kernel config without busybox");
            return false;
        };

        match self
            .ctx
            .commands
            .run(busybox, &["zcat".to_string(), config.display().to_string()])
        {
            Ok(outcome) => outcome.stdout.lines().any(|line| line.trim() == HARDBOOT_OPTION),
            Err(e) => {
                warn!("Failed to read {:?}: {}", config, e);
                false
            }
        }
    }

    fn device_cmdline(&self) -> Result<String> {
        Ok(props::read_cmdline(&self.ctx.config.paths.cmdline)?)
    }

    pub fn prepare_android(&self, rom: &Rom) -> Result<KexecPlan> {
        let kernel = self.ctx.root_path("zImage");
        let initrd = self.ctx.root_path("initrd.img");
        let header = extract_boot_image(&rom.boot_image_path(), &kernel, &initrd)?;

        let cmdline = android_cmdline(
            &self.device_cmdline()?,
            &self.ctx.config.boot.kexec_marker_arg,
            &header.cmdline,
        );
        Ok(KexecPlan::Android {
            kernel,
            initrd,
            cmdline,
        })
    }

    pub fn prepare_ubuntu(&self, rom: &Rom) -> Result<KexecPlan> {
        let partition = if rom.is_on_partition() {
            Some(
                rom.partition()
                    .ok_or_else(|| BootError::PartitionMissing(rom.name.clone()))?,
            )
        } else {
            None
        };

        let loop_mount = partition.as_ref().is_some_and(|part| !part.is_ext());
        let (boot_dir, image_mount) = if loop_mount {
            let mount_point = self.ctx.image_mount_path();
            fsutil::mkdir_recursive(&mount_point, 0o777)?;
            MountOrchestrator::new(self.ctx).mount_loop(
                &rom.path("root.img"),
                &mount_point,
                MountFlags::NOATIME,
            )?;
            (mount_point.join("boot"), Some(mount_point))
        } else {
            (rom.path("root/boot"), None)
        };

        let plan = self.ubuntu_plan(rom, partition.as_deref(), &boot_dir, image_mount.clone());
        if plan.is_err()
            && let Some(mount_point) = image_mount
            && let Err(e) = self.ctx.mounts.unmount(&mount_point)
        {
            warn!("Failed to unmount {:?}: {}", mount_point, e);
        }
        plan
    }

    fn ubuntu_plan(
        &self,
        rom: &Rom,
        partition: Option<&Partition>,
        boot_dir: &Path,
        image_mount: Option<PathBuf>,
    ) -> Result<KexecPlan> {
        let kernel = fsutil::find_file_containing(boot_dir, "vmlinuz").ok_or_else(|| {
            BootError::MissingBootFile {
                what: "vmlinuz",
                dir: boot_dir.to_path_buf(),
            }
        })?;
        let initrd = fsutil::find_file_containing(boot_dir, "initrd.img-").ok_or_else(|| {
            BootError::MissingBootFile {
                what: "initrd",
                dir: boot_dir.to_path_buf(),
            }
        })?;

        let device_cmdline = self.device_cmdline()?;
        let boot = &self.ctx.config.boot;

        let root = match partition {
            Some(part) => UbuntuRoot::removable(part, &rom.base_path),
            None => {
                if RomRegistry::new(self.ctx).data_partition().is_none() {
                    error!("Failed to find ubuntu root partition!");
                    return Err(BootError::PartitionMissing("data".to_string()));
                }
                let device = if boot.ubuntu_root_probe.exists() {
                    &boot.ubuntu_root_primary
                } else {
                    &boot.ubuntu_root_fallback
                };
                UbuntuRoot::internal(device, &rom.base_path, &self.ctx.config.paths.realdata)
            }
        };

        Ok(KexecPlan::Ubuntu {
            kernel,
            initrd,
            cmdline: root.cmdline(&device_cmdline, &boot.kexec_marker_arg),
            image_mount,
        })
    }

    pub fn plan(&self, rom: &Rom) -> Result<KexecPlan> {
        match rom.rom_type.family() {
            RomFamily::Android => self.prepare_android(rom),
            RomFamily::Ubuntu => self.prepare_ubuntu(rom),
            RomFamily::Unsupported => Err(BootError::UnsupportedRomType),
            RomFamily::Unknown => Err(BootError::UnknownRomType {
                name: rom.name.clone(),
                rom_type: rom.rom_type,
            }),
        }
    }

    /// Leave a copy of the loader in the root for the continuation stage.
    fn install_loader(&self, kexec: &Path, installed: &Path) -> Result<()> {
        let busybox = self.ctx.toolbox.busybox()?;
        self.ctx.commands.run(
            busybox,
            &[
                "cp".to_string(),
                kexec.display().to_string(),
                installed.display().to_string(),
            ],
        )?;
        fsutil::set_mode(installed, 0o755)?;
        Ok(())
    }

    /// Build the plan for `rom` and hand it to the kexec loader.
    pub fn load(&self, rom: &Rom) -> Result<KexecPlan> {
        // An internal ROM may need the data partition, so make sure the list is current.
        if !rom.is_on_partition() {
            PartitionScanner::new(self.ctx).scan()?;
        }

        // Resolve the loader before planning mounts anything.
        let kexec = self.ctx.toolbox.kexec()?;
        let plan = self.plan(rom)?;
        if plan.family() == RomFamily::Android
            && let Err(e) = kmsg::write_marker(
                &self.ctx.config.paths.kmsg,
                &self.ctx.config.boot.second_boot_marker,
            )
        {
            warn!("Failed to write continuation marker: {}", e);
        }

        let args = plan.loader_args(&self.ctx.config.boot.kexec_mem_min);
        info!("Loading kexec: {} {}", kexec.display(), args.join(" "));

        let loaded = self.ctx.commands.run(kexec, &args);
        if let Err(e) = &loaded {
            error!("kexec call failed: {}", e);
        }

        self.housekeeping(kexec, &plan);
        loaded?;
        Ok(plan)
    }

    fn housekeeping(&self, kexec: &Path, plan: &KexecPlan) {
        let installed = self.ctx.root_path("kexec");
        if let Err(e) = self.install_loader(kexec, &installed) {
            warn!("Failed to install kexec binary at {:?}: {}", installed, e);
        }

        if let Some(mount_point) = plan.image_mount()
            && let Err(e) = self.ctx.mounts.unmount(mount_point)
        {
            warn!("Failed to unmount {:?}: {}", mount_point, e);
        }

        let log = self.ctx.error_log_path();
        if let Err(e) = kmsg::copy_log(&log) {
            warn!("Failed to copy kernel log to {:?}: {}", log, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use multiboot_sys::{SysError, Toolbox};
    use multiboot_types::{RomId, RomType};

    use super::*;
    use crate::config::Config;
    use crate::testing::{MountCall, RecordingCommands, RecordingMounts, TempDir};

    struct Harness {
        temp: TempDir,
        ctx: BootContext,
        mounts: Arc<RecordingMounts>,
        commands: Arc<RecordingCommands>,
    }

    fn harness() -> Harness {
        harness_with(Toolbox::with_paths(
            "/mr/busybox".into(),
            "/mr/kexec".into(),
            "/mr/ntfs-3g".into(),
        ))
    }

    fn harness_with(toolbox: Toolbox) -> Harness {
        let temp = TempDir::new("kexec");
        temp.layout(&["root", "mr", "mnt"]);
        fs::write(temp.join("cmdline"), "console=ttyS0 androidboot.hardware=grouper\n").expect("cmdline");

        let mut config = Config::default();
        config.paths.root = temp.join("root");
        config.paths.cmdline = temp.join("cmdline");
        config.paths.kmsg = temp.join("kmsg");
        config.paths.mount_root = temp.join("mnt");
        config.paths.realdata = temp.join("realdata");
        config.paths.kernel_config = temp.join("config.gz");
        config.boot.ubuntu_root_probe = temp.join("mmcblk0p10");

        let mounts = Arc::new(RecordingMounts::default());
        let commands = Arc::new(RecordingCommands::default());
        let ctx = BootContext::with_adapters(
            config,
            temp.join("mr"),
            toolbox,
            mounts.clone(),
            commands.clone(),
        );
        Harness {
            temp,
            ctx,
            mounts,
            commands,
        }
    }

    fn boot_image(page: u32, kernel: &[u8], ramdisk: &[u8], cmdline: &str) -> Vec<u8> {
        let page = page as usize;
        let mut image = vec![0u8; page];
        image[..8].copy_from_slice(b"ANDROID!");
        image[8..12].copy_from_slice(&(kernel.len() as u32).to_le_bytes());
        image[16..20].copy_from_slice(&(ramdisk.len() as u32).to_le_bytes());
        image[36..40].copy_from_slice(&(page as u32).to_le_bytes());
        image[64..64 + cmdline.len()].copy_from_slice(cmdline.as_bytes());

        image.extend_from_slice(kernel);
        image.resize(page + kernel.len().div_ceil(page) * page, 0);
        image.extend_from_slice(ramdisk);
        image
    }

    fn rom(base_path: PathBuf, rom_type: RomType, partition: Option<&Arc<Partition>>) -> Rom {
        Rom {
            id: RomId(7),
            name: base_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            base_path,
            rom_type,
            partition: partition.map(Arc::downgrade),
            has_bootimg: true,
        }
    }

    #[test]
    fn ubuntu_cmdlines() {
        let internal = UbuntuRoot::internal(
            "/dev/mmcblk0p10",
            Path::new("/realdata/media/0/multirom/roms/ubuntu"),
            Path::new("/realdata"),
        );
        assert_eq!(
            internal.cmdline("console=ttyS0", "mrom_kexecd=1"),
            "console=ttyS0 root=/dev/mmcblk0p10 rw console=tty1 fbcon=rotate:1 access=m2 quiet \
             splash mrom_kexecd=1 rootflags=defaults,noatime,nodiratime \
             rootsubdir=/media/0/multirom/roms/ubuntu/root"
        );

        let ntfs = Partition::new("sda1", "ABCD", "ntfs").with_mount_path("/mnt/sda1");
        let removable = UbuntuRoot::removable(&ntfs, Path::new("/mnt/sda1/multirom/raring"));
        assert_eq!(removable.root, "UUID=ABCD");
        assert_eq!(
            removable.location,
            "loop=/multirom/raring/root.img loopfstype=ext4"
        );
        assert!(removable.cmdline("c", "m").ends_with(" rootfstype=ntfs-3g"));

        let ext = Partition::new("sda2", "EF01", "ext4").with_mount_path("/mnt/sda2");
        let removable = UbuntuRoot::removable(&ext, Path::new("/mnt/sda2/multirom/raring"));
        assert_eq!(removable.location, "rootsubdir=/multirom/raring/root");
        assert!(!removable.cmdline("c", "m").contains("rootfstype"));
    }

    #[test]
    fn loader_arguments() {
        let plan = KexecPlan::Android {
            kernel: PathBuf::from("/zImage"),
            initrd: PathBuf::from("/initrd.img"),
            cmdline: "a b".to_string(),
        };
        assert_eq!(
            plan.loader_args("0xA0000000"),
            [
                "--load-hardboot",
                "/zImage",
                "--mem-min=0xA0000000",
                "--initrd=/initrd.img",
                "--command-line=a b",
            ]
        );
    }

    #[test]
    fn android_plan_extracts_boot_image() {
        let h = harness();
        let rom_dir = h.temp.join("mr/roms/cm10");
        fs::create_dir_all(&rom_dir).expect("rom dir");
        let kernel = vec![0xAB; 5000];
        let ramdisk = vec![0xCD; 3000];
        fs::write(
            rom_dir.join("boot.img"),
            boot_image(2048, &kernel, &ramdisk, "androidboot.selinux=permissive"),
        )
        .expect("boot.img");

        let plan = KexecPreparer::new(&h.ctx)
            .prepare_android(&rom(rom_dir, RomType::AndroidInternal, None))
            .expect("plan");

        let root = h.temp.join("root");
        assert_eq!(
            plan,
            KexecPlan::Android {
                kernel: root.join("zImage"),
                initrd: root.join("initrd.img"),
                cmdline: "console=ttyS0 androidboot.hardware=grouper mrom_kexecd=1 \
                          androidboot.selinux=permissive"
                    .to_string(),
            }
        );
        assert_eq!(fs::read(root.join("zImage")).expect("kernel"), kernel);
        assert_eq!(fs::read(root.join("initrd.img")).expect("ramdisk"), ramdisk);
    }

    #[test]
    fn ubuntu_image_on_vfat_is_loop_mounted_then_released() {
        let h = harness();
        let part = Arc::new(Partition::new("sda1", "ABCD", "vfat").with_mount_path(h.temp.join("mnt/sda1")));
        h.ctx.partitions.replace(vec![Arc::clone(&part)]);
        let rom_dir = h.temp.join("mnt/sda1/multirom/raring");
        h.temp.layout(&["mnt/sda1/multirom/raring/root.img"]);

        // The fake loop mount exposes nothing, so the kernel lookup fails.
        let err = KexecPreparer::new(&h.ctx)
            .prepare_ubuntu(&rom(rom_dir.clone(), RomType::UbuntuUsbImg, Some(&part)))
            .unwrap_err();
        assert!(matches!(err, BootError::MissingBootFile { what: "vmlinuz", .. }));

        let image = h.temp.join("mnt/image");
        let calls = h.mounts.calls();
        assert_eq!(
            calls[0],
            MountCall::AttachLoop {
                index: 0,
                backing: rom_dir.join("root.img"),
            }
        );
        assert_eq!(calls.last(), Some(&MountCall::Unmount(image)));
    }

    #[test]
    fn internal_ubuntu_needs_data_partition_and_probes_root() {
        let h = harness();
        let rom_dir = h.temp.join("realdata/media/0/multirom/roms/ubuntu");
        let boot_dir = rom_dir.join("root/boot");
        fs::create_dir_all(&boot_dir).expect("boot dir");
        fs::write(boot_dir.join("vmlinuz-3.1.10-8-nexus7"), b"k").expect("kernel");
        fs::write(boot_dir.join("initrd.img-3.1.10-8-nexus7"), b"i").expect("initrd");
        let ubuntu = rom(rom_dir.clone(), RomType::UbuntuInternal, None);
        let preparer = KexecPreparer::new(&h.ctx);

        assert!(matches!(
            preparer.prepare_ubuntu(&ubuntu),
            Err(BootError::PartitionMissing(_))
        ));

        h.ctx
            .partitions
            .replace(vec![Arc::new(Partition::new("mmcblk0p9", "1111", "ext4"))]);
        let plan = preparer.prepare_ubuntu(&ubuntu).expect("plan");

        let KexecPlan::Ubuntu {
            kernel, cmdline, image_mount, ..
        } = plan
        else {
            panic!("expected an Ubuntu plan");
        };
        assert!(kernel.ends_with("vmlinuz-3.1.10-8-nexus7"));
        assert!(cmdline.contains(" root=/dev/mmcblk0p9 "));
        assert!(cmdline.ends_with("rootsubdir=/media/0/multirom/roms/ubuntu/root"));
        assert_eq!(image_mount, None);
    }

    #[test]
    fn hardboot_probe_reads_kernel_config_once() {
        let h = harness();
        fs::write(h.temp.join("config.gz"), b"gz").expect("config");
        h.commands.respond("zcat", "CONFIG_KEXEC=y\nCONFIG_KEXEC_HARDBOOT=y\n");

        let preparer = KexecPreparer::new(&h.ctx);
        assert!(preparer.has_kexec_hardboot());
        assert!(preparer.has_kexec_hardboot());
        assert_eq!(h.commands.calls().len(), 1);
    }

    #[test]
    fn hardboot_probe_without_config_is_false() {
        let h = harness();
        assert!(!KexecPreparer::new(&h.ctx).has_kexec_hardboot());
        assert!(h.commands.calls().is_empty());
    }

    #[test]
    fn load_runs_loader_and_installs_binary() {
        let h = harness();
        let part = Arc::new(Partition::new("sda1", "ABCD", "ext4").with_mount_path(h.temp.join("mnt/sda1")));
        h.ctx.partitions.replace(vec![Arc::clone(&part)]);
        let boot_dir = h.temp.join("mnt/sda1/multirom/raring/root/boot");
        fs::create_dir_all(&boot_dir).expect("boot dir");
        fs::write(boot_dir.join("vmlinuz-3.8"), b"k").expect("kernel");
        fs::write(boot_dir.join("initrd.img-3.8"), b"i").expect("initrd");
        fs::write(h.temp.join("root/kexec"), b"").expect("kexec stub");

        let ubuntu = rom(h.temp.join("mnt/sda1/multirom/raring"), RomType::UbuntuUsbDir, Some(&part));
        let plan = KexecPreparer::new(&h.ctx).load(&ubuntu).expect("load");

        assert_eq!(plan.family(), RomFamily::Ubuntu);
        let calls = h.commands.calls();
        assert!(calls[0].starts_with("/mr/kexec --load-hardboot "));
        assert!(calls[0].contains("root=UUID=ABCD"));
        assert_eq!(
            calls[1],
            format!("/mr/busybox cp /mr/kexec {}", h.temp.join("root/kexec").display())
        );
        assert!(h.mounts.calls().is_empty());
        // No continuation marker for Ubuntu.
        assert!(!h.temp.join("kmsg").exists());
    }

    #[test]
    fn missing_loader_leaves_image_unmounted() {
        let h = harness_with(Toolbox::default());
        let part = Arc::new(Partition::new("sda1", "ABCD", "vfat").with_mount_path(h.temp.join("mnt/sda1")));
        h.ctx.partitions.replace(vec![Arc::clone(&part)]);
        h.temp.layout(&["mnt/sda1/multirom/raring/root.img"]);

        let ubuntu = rom(h.temp.join("mnt/sda1/multirom/raring"), RomType::UbuntuUsbImg, Some(&part));
        let err = KexecPreparer::new(&h.ctx).load(&ubuntu).unwrap_err();

        assert!(matches!(err, BootError::Sys(SysError::ToolNotFound(_))));
        assert!(h.mounts.calls().is_empty());
        assert!(h.commands.calls().is_empty());
    }

    #[test]
    fn failed_loader_is_reported_after_housekeeping() {
        let h = harness();
        let rom_dir = h.temp.join("mr/roms/cm10");
        fs::create_dir_all(&rom_dir).expect("rom dir");
        fs::write(rom_dir.join("boot.img"), boot_image(2048, &[1; 10], &[2; 10], "")).expect("img");
        fs::write(h.temp.join("kmsg"), b"").expect("kmsg");
        h.commands.fail("--load-hardboot");

        let android = rom(rom_dir, RomType::AndroidInternal, None);
        let err = KexecPreparer::new(&h.ctx).load(&android).unwrap_err();
        assert!(matches!(err, BootError::Sys(_)));

        let calls = h.commands.calls();
        assert!(calls[0].ends_with("blkid"));
        assert!(calls.iter().any(|c| c.starts_with("/mr/busybox cp")));

        let kmsg = fs::read_to_string(h.temp.join("kmsg")).expect("kmsg");
        assert!(kmsg.contains("MultiromSaysNextBootShouldBeSecondMagic108"));
    }
}
