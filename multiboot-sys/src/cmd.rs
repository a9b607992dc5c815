// SPDX-License-Identifier: GPL-3.0-only

//! External command execution

use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{Result, SysError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

pub fn render(program: &Path, args: &[String]) -> String {
    if args.is_empty() {
        program.display().to_string()
    } else {
        format!("{} {}", program.display(), args.join(" "))
    }
}

/// Run a program to completion; a non-zero exit status is an error.
pub fn run(program: &Path, args: &[String]) -> Result<CommandOutcome> {
    let rendered = render(program, args);
    debug!("Running {}", rendered);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|error| SysError::CommandFailed {
            command: rendered.clone(),
            stderr: error.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        warn!("{} exited with {}: {}", rendered, output.status, stderr.trim());
        return Err(SysError::CommandFailed {
            command: rendered,
            stderr,
        });
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_command_context() {
        let args = vec![
            "--load-hardboot".to_string(),
            "/zImage".to_string(),
            "--mem-min=0xA0000000".to_string(),
        ];
        let rendered = render(Path::new("/multirom/kexec"), &args);
        assert_eq!(
            rendered,
            "/multirom/kexec --load-hardboot /zImage --mem-min=0xA0000000"
        );
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = run(Path::new("false"), &[]).unwrap_err();
        assert!(matches!(err, SysError::CommandFailed { .. }));
    }

    #[test]
    fn captures_stdout() {
        let outcome = run(Path::new("echo"), &["hello".to_string()]).expect("echo runs");
        assert_eq!(outcome.stdout.trim(), "hello");
    }
}
