// SPDX-License-Identifier: GPL-3.0-only

//! Init script rewriting
//!
//! A secondary Android ROM must not mount `/system` or `/data` itself, since those are
//! already bind- or loop-mounted from the ROM directory. Its `.rc` files are copied to the
//! root with the mounting commands commented out.

use std::fs;
use std::path::Path;

use multiboot_sys::fsutil;
use tracing::{debug, warn};

use crate::error::Result;

/// Keeps an `on` block non-empty after its commands are commented out
const PLACEHOLDER: &str = "    export DUMMY_LINE_INGORE_IT 1\n";
const MAIN_CLASS: &str = "    class main\n";
const RC_MODE: u32 = 0o750;

fn mounts_rom_filesystem(line: &str) -> bool {
    line.contains("mount_all")
        || (line.contains("mount ") && (line.contains("/data") || line.contains("/system")))
}

/// Rewrite one init script.
///
/// Mount commands are prefixed with `#`; the first one after an `on` trigger also gets a
/// placeholder command. `service sdcard` is pinned to the main class and the line after it
/// is dropped.
pub fn rewrite_rc(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + PLACEHOLDER.len());
    let mut guard_open = false;
    let mut lines = input.split_inclusive('\n');

    while let Some(line) = lines.next() {
        if line.contains("on ") {
            guard_open = true;
        } else if mounts_rom_filesystem(line) {
            if guard_open {
                guard_open = false;
                out.push_str(PLACEHOLDER);
            }
            out.push('#');
        } else if line.starts_with("service sdcard") {
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(MAIN_CLASS);
            // Declares the delayed class.
            lines.next();
            continue;
        }
        out.push_str(line);
    }

    out
}

/// Copy `<rom>/boot` into `root`, rewriting `.rc` files on the way.
pub fn install_boot_files(boot_dir: &Path, root: &Path) -> Result<usize> {
    let mut installed = 0;

    for entry in fs::read_dir(boot_dir)?.flatten() {
        let name = entry.file_name();
        let source = entry.path();
        let target = root.join(&name);

        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }

        if !name.to_string_lossy().contains(".rc") {
            if let Err(e) = fsutil::copy_file(&source, &target) {
                warn!("Failed to copy {:?} to {:?}: {}", source, target, e);
            }
            continue;
        }

        let content = match fs::read_to_string(&source) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read {:?}: {}", source, e);
                continue;
            }
        };
        if let Err(e) = fs::write(&target, rewrite_rc(&content)) {
            warn!("Failed to write {:?}: {}", target, e);
            continue;
        }
        fsutil::set_mode(&target, RC_MODE)?;

        debug!("Installed {:?}", target);
        installed += 1;
    }

    Ok(installed)
}
