// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("command failed: {command}; stderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to mount {src:?} on {target:?}: {reason}")]
    MountFailed {
        src: PathBuf,
        target: PathBuf,
        reason: String,
    },

    #[error("Loop device {device:?} setup failed: {reason}")]
    LoopSetup { device: PathBuf, reason: String },

    #[error("Invalid boot image: {0}")]
    InvalidBootImage(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
