// SPDX-License-Identifier: GPL-3.0-only

//! Persisted `key=value` status file

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StatusFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Status as written to disk; ROMs are referenced by name only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStatus {
    pub current_rom: Option<String>,
    pub auto_boot_seconds: i32,
    pub auto_boot_rom: Option<String>,
    pub curr_rom_part: Option<String>,
}

impl PersistedStatus {
    /// Unknown keys are skipped; an unreadable `auto_boot_seconds` counts as 0.
    pub fn parse(input: &str) -> Self {
        let mut status = Self::default();

        for line in input.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim_end_matches('\r');
            let non_empty = (!value.is_empty()).then(|| value.to_string());

            match key {
                "current_rom" => status.current_rom = non_empty,
                "auto_boot_rom" => status.auto_boot_rom = non_empty,
                "curr_rom_part" => status.curr_rom_part = non_empty,
                "auto_boot_seconds" => {
                    status.auto_boot_seconds = value.trim().parse().unwrap_or_else(|_| {
                        warn!("Invalid auto_boot_seconds {:?} in status file, using 0", value);
                        0
                    });
                }
                _ => {}
            }
        }

        status
    }

    pub fn render(&self) -> String {
        format!(
            "current_rom={}\nauto_boot_seconds={}\nauto_boot_rom={}\ncurr_rom_part={}\n",
            self.current_rom.as_deref().unwrap_or_default(),
            self.auto_boot_seconds,
            self.auto_boot_rom.as_deref().unwrap_or_default(),
            self.curr_rom_part.as_deref().unwrap_or_default(),
        )
    }

    /// Read the status file; `Ok(None)` when it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, StatusFileError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StatusFileError> {
        fs::write(path, self.render())?;
        Ok(())
    }
}
