// SPDX-License-Identifier: GPL-3.0-only

//! What the boot manager asks its caller to do when it returns

use serde::{Deserialize, Serialize};

use crate::RomId;

/// Final action requested from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitAction {
    /// Continue booting with the kernel currently running (or the one kexec loaded)
    BootCurrentKernel,
    Reboot,
    RebootRecovery,
    RebootBootloader,
    Shutdown,
}

impl ExitAction {
    pub fn is_reboot(self) -> bool {
        matches!(
            self,
            Self::Reboot | Self::RebootRecovery | Self::RebootBootloader
        )
    }
}

/// Exit action plus the flags the caller needs to finish the handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPlan {
    pub action: ExitAction,

    /// Unmount the boot manager's filesystems before acting
    pub unmount: bool,

    /// A new kernel was loaded with kexec and will run on the next reboot
    pub kexec_loaded: bool,
}

impl ExitPlan {
    const REBOOT: i32 = 0x01;
    const UMOUNT: i32 = 0x02;
    const RECOVERY: i32 = 0x04;
    const BOOTLOADER: i32 = 0x08;
    const SHUTDOWN: i32 = 0x10;
    const KEXEC: i32 = 0x20;

    pub fn new(action: ExitAction) -> Self {
        Self {
            action,
            unmount: true,
            kexec_loaded: false,
        }
    }

    /// Plain reboot, used both as the default and as the emergency fallback
    pub fn reboot() -> Self {
        Self::new(ExitAction::Reboot)
    }

    /// Encode as the bitmask the init trampoline understands
    pub fn code(&self) -> i32 {
        let mut code = match self.action {
            ExitAction::BootCurrentKernel => 0,
            ExitAction::Reboot => Self::REBOOT,
            ExitAction::RebootRecovery => Self::RECOVERY,
            ExitAction::RebootBootloader => Self::BOOTLOADER,
            ExitAction::Shutdown => Self::SHUTDOWN,
        };
        if self.unmount {
            code |= Self::UMOUNT;
        }
        if self.kexec_loaded {
            code |= Self::KEXEC;
        }
        code
    }
}

impl Default for ExitPlan {
    fn default() -> Self {
        Self::reboot()
    }
}

/// Result of the ROM selection step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiExit {
    BootRom(RomId),
    Reboot,
    RebootRecovery,
    RebootBootloader,
    Shutdown,
}

impl UiExit {
    /// Exit plan for the non-boot choices; `None` when a ROM was chosen
    pub fn exit_plan(self) -> Option<ExitPlan> {
        let action = match self {
            Self::BootRom(_) => return None,
            Self::Reboot => ExitAction::Reboot,
            Self::RebootRecovery => ExitAction::RebootRecovery,
            Self::RebootBootloader => ExitAction::RebootBootloader,
            Self::Shutdown => ExitAction::Shutdown,
        };
        Some(ExitPlan::new(action))
    }
}
