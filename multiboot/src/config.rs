// SPDX-License-Identifier: GPL-3.0-only

//! Boot manager configuration
//!
//! Every value has a built-in default matching the stock device layout, so an absent
//! configuration file is not an error. A file only needs the keys it overrides:
//!
//! ```toml
//! [monitor]
//! settle_ms = 750
//!
//! [logging]
//! level = "debug"
//! directory = "/realdata/media/0/multirom/logs"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BootError, Result};

pub const CONFIG_ENV: &str = "MULTIBOOT_CONFIG";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Candidate boot manager directories, first existing wins
    pub base_dir_candidates: Vec<PathBuf>,
    /// Where the real /data partition is mounted while the boot manager runs
    pub realdata: PathBuf,
    /// Root of the filesystem the chosen ROM boots into
    pub root: PathBuf,
    pub block_dir: PathBuf,
    /// Parent of removable partition mount points
    pub mount_root: PathBuf,
    pub loop_dev_dir: PathBuf,
    /// Block device holding the running system's boot image
    pub boot_block: PathBuf,
    pub cmdline: PathBuf,
    pub last_kmsg: PathBuf,
    pub kmsg: PathBuf,
    pub kernel_config: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir_candidates: vec![
                PathBuf::from("/realdata/media/0/multirom"),
                PathBuf::from("/realdata/media/multirom"),
            ],
            realdata: PathBuf::from("/realdata"),
            root: PathBuf::from("/"),
            block_dir: PathBuf::from("/dev/block"),
            mount_root: PathBuf::from("/mnt"),
            loop_dev_dir: PathBuf::from("/dev"),
            boot_block: PathBuf::from("/dev/block/mmcblk0p2"),
            cmdline: PathBuf::from("/proc/cmdline"),
            last_kmsg: PathBuf::from("/proc/last_kmsg"),
            kmsg: PathBuf::from("/dev/kmsg"),
            kernel_config: PathBuf::from("/proc/config.gz"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootConfig {
    pub internal_rom_name: String,
    pub max_rom_name_len: usize,
    /// Device-name prefix of internal storage partitions
    pub internal_block_prefix: String,
    pub kexec_mem_min: String,
    pub second_boot_marker: String,
    /// Token appended to the handoff command line
    pub kexec_marker_arg: String,
    /// Internal Ubuntu root: `primary` when `probe` exists, else `fallback`
    pub ubuntu_root_probe: PathBuf,
    pub ubuntu_root_primary: String,
    pub ubuntu_root_fallback: String,
    pub partition_wait_tries: u32,
    pub partition_wait_interval_ms: u64,
    /// Length of one auto-boot countdown step
    pub auto_boot_tick_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            internal_rom_name: "Internal".to_string(),
            max_rom_name_len: 26,
            internal_block_prefix: "mmcblk".to_string(),
            kexec_mem_min: "0xA0000000".to_string(),
            second_boot_marker: "MultiromSaysNextBootShouldBeSecondMagic108".to_string(),
            kexec_marker_arg: "mrom_kexecd=1".to_string(),
            ubuntu_root_probe: PathBuf::from("/dev/block/mmcblk0p10"),
            ubuntu_root_primary: "/dev/mmcblk0p10".to_string(),
            ubuntu_root_fallback: "/dev/mmcblk0p9".to_string(),
            partition_wait_tries: 10,
            partition_wait_interval_ms: 1000,
            auto_boot_tick_ms: 1000,
        }
    }
}

impl BootConfig {
    pub fn partition_wait_interval(&self) -> Duration {
        Duration::from_millis(self.partition_wait_interval_ms)
    }

    pub fn auto_boot_tick(&self) -> Duration {
        Duration::from_millis(self.auto_boot_tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Quiet time after the last block-device change before rescanning
    pub settle_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            settle_ms: 500,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    /// File logging is enabled when set
    pub directory: Option<PathBuf>,
    pub keep_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LoggingLevel::Info,
            directory: None,
            keep_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub boot: BootConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|error| BootError::Config {
            reason: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| BootError::Config {
            reason: format!("{}: {}", path.display(), error),
        })?;
        Self::parse(&raw)
    }

    /// Explicit path, then `$MULTIBOOT_CONFIG`, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(BootError::Config {
                reason: reason.to_string(),
            })
        };

        if self.paths.base_dir_candidates.is_empty() {
            return invalid("paths.base_dir_candidates must not be empty");
        }
        if self.boot.internal_rom_name.is_empty() {
            return invalid("boot.internal_rom_name must not be empty");
        }
        if self.boot.max_rom_name_len == 0 {
            return invalid("boot.max_rom_name_len must be positive");
        }
        if self.monitor.poll_interval_ms == 0 {
            return invalid("monitor.poll_interval_ms must be positive");
        }
        if self.monitor.settle_ms < self.monitor.poll_interval_ms {
            return invalid("monitor.settle_ms must not be shorter than the poll interval");
        }
        Ok(())
    }
}
