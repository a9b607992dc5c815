// SPDX-License-Identifier: GPL-3.0-only

//! ROM data models
//!
//! A ROM is a self-contained operating-system installation living in a directory tree,
//! either under the internal ROMs directory or on a removable partition.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::Partition;

/// Process-unique ROM identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RomId(pub u32);

impl std::fmt::Display for RomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operating-system family a ROM belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RomFamily {
    Android,
    Ubuntu,
    Unsupported,
    Unknown,
}

/// Layout classification of a ROM directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RomType {
    /// The system the device itself runs (reserved internal name, no partition)
    Default,
    /// Android with `system/data/cache` directories in internal storage
    AndroidInternal,
    /// Android with `system/data/cache` directories on removable media
    AndroidUsbDir,
    /// Android with `system.img/data.img/cache.img` on removable media
    AndroidUsbImg,
    /// Ubuntu `root` directory in internal storage
    UbuntuInternal,
    /// Ubuntu `root` directory on removable media
    UbuntuUsbDir,
    /// Ubuntu `root.img` on removable media
    UbuntuUsbImg,
    /// Legacy Ubuntu layout (ships a `boot.img`) in internal storage
    UnsupportedInternal,
    /// Legacy Ubuntu layout (ships a `boot.img`) on removable media
    UnsupportedUsb,
    Unknown,
}

impl RomType {
    pub fn family(self) -> RomFamily {
        match self {
            Self::Default | Self::AndroidInternal | Self::AndroidUsbDir | Self::AndroidUsbImg => {
                RomFamily::Android
            }
            Self::UbuntuInternal | Self::UbuntuUsbDir | Self::UbuntuUsbImg => RomFamily::Ubuntu,
            Self::UnsupportedInternal | Self::UnsupportedUsb => RomFamily::Unsupported,
            Self::Unknown => RomFamily::Unknown,
        }
    }

    pub fn is_android(self) -> bool {
        self.family() == RomFamily::Android
    }

    pub fn is_ubuntu(self) -> bool {
        self.family() == RomFamily::Ubuntu
    }

    pub fn is_unsupported(self) -> bool {
        self.family() == RomFamily::Unsupported
    }

    /// Whether this ROM was found on removable media
    pub fn is_usb(self) -> bool {
        matches!(
            self,
            Self::AndroidUsbDir
                | Self::AndroidUsbImg
                | Self::UbuntuUsbDir
                | Self::UbuntuUsbImg
                | Self::UnsupportedUsb
        )
    }

    /// Whether the ROM's filesystems are image files rather than directories
    pub fn is_image_backed(self) -> bool {
        matches!(self, Self::AndroidUsbImg | Self::UbuntuUsbImg)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AndroidInternal => "android_internal",
            Self::AndroidUsbDir => "android_usb_dir",
            Self::AndroidUsbImg => "android_usb_img",
            Self::UbuntuInternal => "ubuntu_internal",
            Self::UbuntuUsbDir => "ubuntu_usb_dir",
            Self::UbuntuUsbImg => "ubuntu_usb_img",
            Self::UnsupportedInternal => "unsupported_internal",
            Self::UnsupportedUsb => "unsupported_usb",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bootable installation
#[derive(Debug, Clone, Serialize)]
pub struct Rom {
    pub id: RomId,

    /// Directory name, at most the configured name cap
    pub name: String,

    /// Root directory of the ROM
    pub base_path: PathBuf,

    pub rom_type: RomType,

    /// Partition the ROM lives on; `None` for internal ROMs
    #[serde(skip)]
    pub partition: Option<Weak<Partition>>,

    /// Whether `boot.img` exists in the base directory
    pub has_bootimg: bool,
}

impl Rom {
    /// Upgrade the weak partition reference, if the partition is still known
    pub fn partition(&self) -> Option<Arc<Partition>> {
        self.partition.as_ref().and_then(Weak::upgrade)
    }

    /// Whether the ROM was created from a partition, even if that partition is gone
    pub fn is_on_partition(&self) -> bool {
        self.partition.is_some()
    }

    pub fn partition_uuid(&self) -> Option<String> {
        self.partition().map(|p| p.uuid.clone())
    }

    pub fn boot_image_path(&self) -> PathBuf {
        self.base_path.join("boot.img")
    }

    pub fn path(&self, child: impl AsRef<Path>) -> PathBuf {
        self.base_path.join(child)
    }

    /// Whether booting this ROM requires handing off to another kernel
    pub fn needs_kexec(&self) -> bool {
        self.rom_type != RomType::Default && (self.rom_type.is_ubuntu() || self.has_bootimg)
    }
}

/// Order ROM names the way a user-facing list should show them.
///
/// Case is folded first so `Aosp` sorts next to `aosp`; ties fall back to byte order to
/// keep the ordering total.
pub fn collate_names(left: &str, right: &str) -> Ordering {
    let folded = left
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(right.chars().flat_map(char::to_lowercase));

    folded.then_with(|| left.cmp(right))
}
