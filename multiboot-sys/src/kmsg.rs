// SPDX-License-Identifier: GPL-3.0-only

//! Kernel log access
//!
//! The continuation marker is written to the kernel log before a kexec handoff; the next
//! boot finds it in the retained log of the previous kernel.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, SysError};

const SYSLOG_ACTION_READ_ALL: libc::c_int = 3;
const SYSLOG_ACTION_SIZE_BUFFER: libc::c_int = 10;

const MIN_LOG_LEN: usize = 16 * 1024;
const MAX_LOG_LEN: usize = 16 * 1024 * 1024;

/// Whether any line of the log at `path` contains `marker`; a missing log counts as no.
pub fn log_contains(path: &Path, marker: &str) -> bool {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot open {:?}: {}", path, e);
            return false;
        }
    };

    BufReader::new(file)
        .split(b'\n')
        .map_while(io::Result::ok)
        .any(|line| String::from_utf8_lossy(&line).contains(marker))
}

/// Append one line to the kernel log device.
pub fn write_marker(kmsg_path: &Path, marker: &str) -> Result<()> {
    let mut kmsg = OpenOptions::new().write(true).open(kmsg_path)?;
    writeln!(kmsg, "{marker}")?;
    Ok(())
}

pub fn clamp_log_len(reported: i32) -> usize {
    usize::try_from(reported)
        .unwrap_or(0)
        .clamp(MIN_LOG_LEN, MAX_LOG_LEN)
}

/// Read the kernel ring buffer.
pub fn read_kernel_log() -> Result<Vec<u8>> {
    // SAFETY: SIZE_BUFFER ignores the buffer arguments.
    let reported = unsafe { libc::klogctl(SYSLOG_ACTION_SIZE_BUFFER, std::ptr::null_mut(), 0) };
    let mut buffer = vec![0u8; clamp_log_len(reported)];

    let len = libc::c_int::try_from(buffer.len()).unwrap_or(libc::c_int::MAX);
    // SAFETY: the buffer is valid for `len` bytes.
    let read = unsafe { libc::klogctl(SYSLOG_ACTION_READ_ALL, buffer.as_mut_ptr().cast(), len) };
    if read <= 0 {
        return Err(SysError::OperationFailed(format!(
            "Could not get klog: {}",
            io::Error::last_os_error()
        )));
    }

    buffer.truncate(read as usize);
    Ok(buffer)
}

/// Dump the kernel log into `dest` so it survives the reboot.
pub fn copy_log(dest: &Path) -> Result<()> {
    let log = read_kernel_log()?;
    fs::write(dest, &log).map_err(|e| {
        warn!("Failed to open {:?}: {}", dest, e);
        SysError::Io(e)
    })?;
    fs::set_permissions(dest, fs::Permissions::from_mode(0o777))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marker_in_retained_log() {
        let path = std::env::temp_dir().join(format!("multiboot-last-kmsg-{}", std::process::id()));
        fs::write(
            &path,
            "[    0.000] Booting\n[    1.234] MultiromSaysNextBootShouldBeSecondMagic108\n",
        )
        .expect("write log");

        assert!(log_contains(&path, "MultiromSaysNextBootShouldBeSecondMagic108"));
        assert!(!log_contains(&path, "SomethingElse"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_log_has_no_marker() {
        assert!(!log_contains(Path::new("/nonexistent/last_kmsg"), "marker"));
    }

    #[test]
    fn clamps_reported_size() {
        assert_eq!(clamp_log_len(-1), MIN_LOG_LEN);
        assert_eq!(clamp_log_len(64 * 1024), 64 * 1024);
        assert_eq!(clamp_log_len(i32::MAX), MAX_LOG_LEN);
    }
}
