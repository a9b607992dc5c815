// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use multiboot_sys::SysError;
use multiboot_types::{RomType, StatusFileError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("Status file error: {0}")]
    StatusFile(#[from] StatusFileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not find multirom folder")]
    NoBaseDir,

    #[error("Could not find the internal ROM")]
    NoInternalRom,

    #[error("ROM {0} not found")]
    RomNotFound(String),

    #[error("Unknown ROM type {rom_type} for {name}")]
    UnknownRomType { name: String, rom_type: RomType },

    #[error("Unsupported ROM type")]
    UnsupportedRomType,

    #[error("Kexec-hardboot support is required")]
    KexecUnavailable,

    #[error("ROM's name contains spaces")]
    NameHasSpaces,

    #[error("No {what} found in {dir:?}")]
    MissingBootFile { what: &'static str, dir: PathBuf },

    #[error("Partition {0} not found")]
    PartitionMissing(String),

    #[error("Failed to read API level from {0:?}")]
    ApiLevel(PathBuf),

    #[error("Trying to boot Android with Ubuntu boot.img")]
    UbuntuBootImage,

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

pub type Result<T> = std::result::Result<T, BootError>;
