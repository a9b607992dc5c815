// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem namespace for booting a secondary Android ROM

use std::fs;
use std::path::{Path, PathBuf};

use multiboot_sys::{MountFlags, fsutil, props};
use multiboot_types::{Rom, RomType};
use tracing::{debug, info, warn};

use crate::context::BootContext;
use crate::error::{BootError, Result};
use crate::initrc;

const AID_SYSTEM: u32 = 1000;
const AID_CACHE: u32 = 2001;

/// Last platform API level using the single-user external storage layout
pub const LEGACY_MEDIA_MAX_API: u32 = 16;

const LAYOUT_VERSION: &str = "data/.layout_version";

/// One of the three Android filesystems a ROM provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndroidFs {
    System,
    Data,
    Cache,
}

impl AndroidFs {
    pub const ALL: [Self; 3] = [Self::System, Self::Data, Self::Cache];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Data => "data",
            Self::Cache => "cache",
        }
    }

    pub fn image_name(self) -> &'static str {
        match self {
            Self::System => "system.img",
            Self::Data => "data.img",
            Self::Cache => "cache.img",
        }
    }

    fn mode(self) -> u32 {
        match self {
            Self::System => 0o755,
            Self::Data => 0o771,
            Self::Cache => 0o770,
        }
    }

    fn owner(self) -> Option<(u32, u32)> {
        match self {
            Self::System => None,
            Self::Data => Some((AID_SYSTEM, AID_SYSTEM)),
            Self::Cache => Some((AID_SYSTEM, AID_CACHE)),
        }
    }

    fn read_only(self) -> bool {
        self == Self::System
    }
}

/// Source and target of the external storage bind mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLink {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Whether `.layout_version` must be written afterwards
    pub multi_user: bool,
}

impl MediaLink {
    /// `media_new` means the real data partition already uses `media/0`.
    pub fn plan(api_level: u32, media_new: bool, realdata: &Path, root: &Path) -> Self {
        let real_media = realdata.join("media");
        let rom_media = root.join("data/media");

        if api_level <= LEGACY_MEDIA_MAX_API {
            Self {
                from: if media_new { real_media.join("0") } else { real_media },
                to: rom_media,
                multi_user: false,
            }
        } else {
            Self {
                from: real_media,
                to: if media_new { rom_media } else { rom_media.join("0") },
                multi_user: true,
            }
        }
    }
}

pub struct MountOrchestrator<'a> {
    ctx: &'a BootContext,
}

impl<'a> MountOrchestrator<'a> {
    pub fn new(ctx: &'a BootContext) -> Self {
        Self { ctx }
    }

    /// Attach `src` to a fresh loop device and mount it on `dst` as ext4.
    pub fn mount_loop(&self, src: &Path, dst: &Path, flags: MountFlags) -> Result<PathBuf> {
        let index = self.ctx.next_loop_index();
        let device = self.ctx.mounts.attach_loop(index, src)?;
        self.ctx.mounts.mount(&device, dst, "ext4", flags)?;
        debug!("Loop-mounted {:?} on {:?} via {:?}", src, dst, device);
        Ok(device)
    }

    /// Install the ROM's init scripts and mount its system, data and cache.
    ///
    /// Stops at the first failed mount; earlier mounts are left for the caller to unwind.
    pub fn prepare_android_mounts(&self, rom: &Rom) -> Result<()> {
        let root = &self.ctx.config.paths.root;
        let installed = initrc::install_boot_files(&rom.path("boot"), root)?;
        info!("Installed {} init scripts from {}", installed, rom.name);

        for fs in AndroidFs::ALL {
            self.make_mount_point(fs)?;
        }

        let image_backed = rom.rom_type == RomType::AndroidUsbImg;
        for fs in AndroidFs::ALL {
            let target = self.ctx.root_path(fs.dir_name());
            if image_backed {
                let flags = if fs.read_only() {
                    MountFlags::RDONLY_NOATIME
                } else {
                    MountFlags::NOATIME
                };
                self.mount_loop(&rom.path(fs.image_name()), &target, flags)?;
            } else {
                self.ctx
                    .mounts
                    .bind(&rom.path(fs.dir_name()), &target, fs.read_only())?;
            }
        }
        Ok(())
    }

    fn make_mount_point(&self, fs: AndroidFs) -> Result<()> {
        let path = self.ctx.root_path(fs.dir_name());
        fsutil::mkdir_with_perms(&path, fs.mode(), None)?;
        if let Some((uid, gid)) = fs.owner()
            && let Err(e) = fsutil::chown_path(&path, uid, gid)
        {
            warn!("Failed to chown {:?} to {}:{}: {}", path, uid, gid, e);
        }
        Ok(())
    }

    /// Expose the real external storage inside the ROM's `/data`.
    pub fn create_media_link(&self) -> Result<MediaLink> {
        let root = &self.ctx.config.paths.root;
        let realdata = &self.ctx.config.paths.realdata;
        let build_prop = root.join("system/build.prop");

        let api_level = match props::read_api_level(&build_prop) {
            Ok(Some(level)) if level > 0 => level,
            Ok(_) => return Err(BootError::ApiLevel(build_prop)),
            Err(e) => {
                warn!("Could not open {:?} to read api level: {}", build_prop, e);
                return Err(BootError::ApiLevel(build_prop));
            }
        };

        let media_new = realdata.join("media/0").exists();
        let link = MediaLink::plan(api_level, media_new, realdata, root);
        info!(
            "Making media dir: api {}, media_new {}, {:?} to {:?}",
            api_level, media_new, link.from, link.to
        );

        fsutil::mkdir_recursive(&link.to, 0o775)?;
        self.ctx.mounts.bind(&link.from, &link.to, false)?;

        if link.multi_user {
            let marker = root.join(LAYOUT_VERSION);
            fs::write(&marker, "2")?;
            fsutil::set_mode(&marker, 0o600)?;
        }
        Ok(link)
    }
}
