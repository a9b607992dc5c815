// SPDX-License-Identifier: GPL-3.0-only

//! The user-facing side of ROM selection
//!
//! [`BootSelector`](crate::selector::BootSelector) drives a [`BootUi`] and never renders
//! anything itself. [`ConsoleUi`] is the line-oriented implementation the binary uses.

use std::fmt;
use std::io::{BufRead, Write};

use multiboot_types::{Rom, Status, UiExit};

/// Informational events the selector reports while it works
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Removable ROMs were rebuilt after a hot-plug event
    RomsRefreshed { removable: usize },
    Booting { name: String },
    AutoBootCancelled,
    /// Continuing the boot started before the kexec handoff
    SecondBoot { name: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomsRefreshed { removable } => {
                write!(f, "Partitions changed, {removable} ROM(s) on removable media")
            }
            Self::Booting { name } => write!(f, "Booting {name}..."),
            Self::AutoBootCancelled => f.write_str("Auto-boot cancelled"),
            Self::SecondBoot { name } => write!(f, "Continuing boot of {name}"),
        }
    }
}

pub trait BootUi {
    /// Ask for a choice; `None` means nothing was chosen yet and the caller polls again.
    fn select(&mut self, status: &Status) -> Option<UiExit>;

    /// Show one countdown step; returning false cancels the auto-boot.
    fn auto_boot_tick(&mut self, rom: &Rom, remaining: u32) -> bool;

    fn notify(&mut self, notice: Notice);

    fn show_error(&mut self, message: &str);

    /// Block until the user has seen the last error.
    fn wait_for_acknowledgment(&mut self);
}

/// Line-oriented UI over any reader and writer
pub struct ConsoleUi<R, W> {
    input: R,
    output: W,
    preselect: Option<String>,
    interactive: bool,
}

impl<R: BufRead, W: Write> ConsoleUi<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            preselect: None,
            interactive: true,
        }
    }

    /// Choose the ROM named `name` on the first prompt instead of asking.
    pub fn with_selection(mut self, name: impl Into<String>) -> Self {
        self.preselect = Some(name.into());
        self
    }

    /// Never read from the input; an empty choice boots the current ROM.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn print_menu(&mut self, status: &Status) {
        let _ = writeln!(self.output, "Available ROMs:");
        for (index, rom) in status.roms.iter().enumerate() {
            let marker = if status.current_rom == Some(rom.id) { '*' } else { ' ' };
            let location = match rom.partition() {
                Some(part) => format!(" on {}", part.name),
                None => String::new(),
            };
            let _ = writeln!(
                self.output,
                "{marker}[{}] {} ({}){location}",
                index + 1,
                rom.name,
                rom.rom_type
            );
        }
        let _ = writeln!(
            self.output,
            " [r] refresh  [b] reboot  [R] recovery  [l] bootloader  [s] shutdown"
        );
        let _ = write!(self.output, "Choice (Enter boots the current ROM): ");
        let _ = self.output.flush();
    }

    /// Interpret one line of input against the ROM list.
    fn parse_choice(&mut self, status: &Status, choice: &str) -> Option<UiExit> {
        match choice {
            "" => status.current_rom.map(UiExit::BootRom),
            "r" => None,
            "b" => Some(UiExit::Reboot),
            "R" => Some(UiExit::RebootRecovery),
            "l" => Some(UiExit::RebootBootloader),
            "s" => Some(UiExit::Shutdown),
            other => {
                let picked = other
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| status.roms.get(n));
                if picked.is_none() {
                    let _ = writeln!(self.output, "Invalid choice: {other}");
                }
                picked.map(|rom| UiExit::BootRom(rom.id))
            }
        }
    }
}

impl<R: BufRead, W: Write> BootUi for ConsoleUi<R, W> {
    fn select(&mut self, status: &Status) -> Option<UiExit> {
        if let Some(name) = self.preselect.take() {
            match status.find_rom(&name, None) {
                Some(rom) => return Some(UiExit::BootRom(rom.id)),
                None => {
                    let _ = writeln!(self.output, "ROM {name} not found");
                }
            }
        }

        if !self.interactive {
            return Some(status.current_rom.map_or(UiExit::Reboot, UiExit::BootRom));
        }

        self.print_menu(status);
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            // Closed input behaves like pressing Enter.
            Ok(0) | Err(_) => Some(status.current_rom.map_or(UiExit::Reboot, UiExit::BootRom)),
            Ok(_) => self.parse_choice(status, line.trim()),
        }
    }

    fn auto_boot_tick(&mut self, rom: &Rom, remaining: u32) -> bool {
        let plural = if remaining == 1 { "" } else { "s" };
        let _ = writeln!(
            self.output,
            "Booting {} in {remaining} second{plural}.",
            rom.name
        );
        let _ = self.output.flush();
        true
    }

    fn notify(&mut self, notice: Notice) {
        let _ = writeln!(self.output, "{notice}");
    }

    fn show_error(&mut self, message: &str) {
        let _ = writeln!(self.output, "Error: {message}");
        let _ = self.output.flush();
    }

    fn wait_for_acknowledgment(&mut self) {
        if !self.interactive {
            return;
        }
        let _ = write!(self.output, "Press Enter to continue.");
        let _ = self.output.flush();
        let mut line = String::new();
        let _ = self.input.read_line(&mut line);
    }
}
