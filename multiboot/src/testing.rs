// SPDX-License-Identifier: GPL-3.0-only

//! Recording fakes for the privileged adapters, plus a self-cleaning temp directory

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use multiboot_sys::cmd::{self, CommandOutcome};
use multiboot_sys::{CommandAdapter, MountAdapter, MountFlags, Result, SysError};

static COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "multiboot-{label}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub fn join(&self, child: impl AsRef<Path>) -> PathBuf {
        self.path.join(child)
    }

    /// Create each relative path as a directory, or as a file when it ends in a known extension.
    pub fn layout(&self, entries: &[&str]) {
        for entry in entries {
            let path = self.path.join(entry);
            if entry.ends_with(".img") || entry.ends_with(".rc") || entry.ends_with(".prop") {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).expect("create parent");
                }
                fs::write(&path, b"").expect("create file");
            } else {
                fs::create_dir_all(&path).expect("create dir");
            }
        }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Mount {
        source: PathBuf,
        target: PathBuf,
        fs_type: String,
        flags: MountFlags,
    },
    Bind {
        source: PathBuf,
        target: PathBuf,
        read_only: bool,
    },
    Unmount(PathBuf),
    AttachLoop {
        index: u32,
        backing: PathBuf,
    },
}

#[derive(Debug, Default)]
pub struct RecordingMounts {
    calls: Mutex<Vec<MountCall>>,
    failing_targets: Mutex<Vec<PathBuf>>,
}

impl RecordingMounts {
    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Make every mount or bind onto `target` fail.
    pub fn fail_target(&self, target: impl Into<PathBuf>) {
        self.failing_targets
            .lock()
            .expect("failing lock")
            .push(target.into());
    }

    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MountCall::Unmount(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MountCall, target: &Path) -> Result<()> {
        self.calls.lock().expect("calls lock").push(call);
        if self
            .failing_targets
            .lock()
            .expect("failing lock")
            .iter()
            .any(|failing| failing == target)
        {
            return Err(SysError::MountFailed {
                src: PathBuf::new(),
                target: target.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl MountAdapter for RecordingMounts {
    fn mount(&self, source: &Path, target: &Path, fs_type: &str, flags: MountFlags) -> Result<()> {
        self.record(
            MountCall::Mount {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                fs_type: fs_type.to_string(),
                flags,
            },
            target,
        )
    }

    fn bind(&self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        self.record(
            MountCall::Bind {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                read_only,
            },
            target,
        )
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(MountCall::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn attach_loop(&self, index: u32, backing: &Path) -> Result<PathBuf> {
        self.calls.lock().expect("calls lock").push(MountCall::AttachLoop {
            index,
            backing: backing.to_path_buf(),
        });
        Ok(PathBuf::from(format!("/dev/loop{index}")))
    }
}

/// Commands succeed with empty output unless a scripted response matches the rendered line.
#[derive(Debug, Default)]
pub struct RecordingCommands {
    calls: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, std::result::Result<String, String>)>>,
}

impl RecordingCommands {
    pub fn respond(&self, needle: &str, stdout: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .push((needle.to_string(), Ok(stdout.to_string())));
    }

    pub fn fail(&self, needle: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .push((needle.to_string(), Err("injected failure".to_string())));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl CommandAdapter for RecordingCommands {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutcome> {
        let command = cmd::render(program, args);
        self.calls.lock().expect("calls lock").push(command.clone());

        let response = self
            .responses
            .lock()
            .expect("responses lock")
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, response)| response.clone());

        match response {
            Some(Err(stderr)) => Err(SysError::CommandFailed { command, stderr }),
            Some(Ok(stdout)) => Ok(CommandOutcome {
                command,
                stdout,
                stderr: String::new(),
            }),
            None => Ok(CommandOutcome {
                command,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}
