// SPDX-License-Identifier: GPL-3.0-only

//! Readers for `build.prop` and the kernel command line

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

const SDK_KEY: &str = "ro.build.version.sdk=";

/// Platform API level from build.prop contents.
///
/// Only the first `ro.build.version.sdk=` line counts; a non-numeric value reads as 0.
pub fn parse_api_level(content: &str) -> Option<u32> {
    let line = content.lines().find(|line| line.starts_with(SDK_KEY))?;
    let value = line[SDK_KEY.len()..].trim();
    let level = value
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0);

    if level == 0 {
        warn!("Invalid ro.build.version.sdk line in build.prop: {:?}", line);
    }
    Some(level)
}

pub fn read_api_level(build_prop: &Path) -> Result<Option<u32>> {
    let content = fs::read_to_string(build_prop)?;
    Ok(parse_api_level(&content))
}

/// Kernel command line with newlines folded into spaces.
pub fn read_cmdline(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)?;
    Ok(raw.replace('\n', " ").trim_end().to_string())
}
