// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multiboot::monitor::PartitionScanner;
use multiboot::registry::classify;
use multiboot::{BootContext, BootSelector, Config, ConsoleUi, ExitPlan, logging};
use tracing::{error, info};

/// Multi-boot orchestrator run by the init trampoline
#[derive(Parser)]
#[command(name = "multiboot")]
#[command(about = "Select, prepare and hand off to one of several installed ROMs", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to $MULTIBOOT_CONFIG, then built-in values)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the boot manager; the exit code is the trampoline's action bitmask
    Boot {
        /// Boot the ROM with this name without asking
        #[arg(long)]
        select: Option<String>,
        /// Never read from stdin
        #[arg(long)]
        auto: bool,
    },
    /// Print the loaded status without booting anything
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Enumerate and mount partitions, print them, then unmount again
    Partitions {
        #[arg(long)]
        json: bool,
    },
    /// Classify a ROM directory
    Classify {
        dir: PathBuf,
        /// Treat the directory as living on removable media
        #[arg(long)]
        removable: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging);

    let command = cli.command.unwrap_or(Commands::Boot {
        select: None,
        auto: false,
    });

    match command {
        Commands::Boot { select, auto } => Ok(boot(config, select, auto)),
        Commands::Status { json } => {
            let ctx = BootContext::discover(config)?;
            let mut selector = BootSelector::new(&ctx);
            selector.load_status()?;
            let status = selector.status();

            if json {
                println!("{}", serde_json::to_string_pretty(status)?);
            } else {
                for rom in &status.roms {
                    let current = if status.current_rom == Some(rom.id) { "*" } else { " " };
                    println!("{current} {:<26} {}", rom.name, rom.rom_type);
                }
                println!("second boot: {}", status.is_second_boot);
                println!("auto-boot seconds: {}", status.auto_boot_seconds);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Partitions { json } => {
            let ctx = BootContext::discover(config)?;
            let scanner = PartitionScanner::new(&ctx);
            scanner.scan().context("Partition scan failed")?;

            let parts = ctx.partitions.snapshot();
            if json {
                let parts: Vec<_> = parts.iter().map(Arc::as_ref).collect();
                println!("{}", serde_json::to_string_pretty(&parts)?);
            } else {
                for part in &parts {
                    let mount = part
                        .mount_path()
                        .map_or_else(|| "-".to_string(), |p| p.display().to_string());
                    println!("{:<12} {:<38} {:<6} {}", part.name, part.uuid, part.fs_type, mount);
                }
            }
            scanner.release();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Classify { dir, removable } => {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable directory name", dir.display()))?;
            let rom_type = classify(&dir, name, removable, &config.boot.internal_rom_name);
            println!("{rom_type}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run the boot manager; every failure still produces an exit plan.
fn boot(config: Config, select: Option<String>, auto: bool) -> ExitCode {
    let plan = match run_boot(config, select, auto) {
        Ok(plan) => plan,
        Err(e) => {
            error!("Boot manager failed: {:#}", e);
            ExitPlan::reboot()
        }
    };
    info!("Exiting with {:?} (code {:#x})", plan, plan.code());

    // The trampoline reads a bitmask that always fits in one byte.
    ExitCode::from(u8::try_from(plan.code()).unwrap_or(u8::MAX))
}

fn run_boot(config: Config, select: Option<String>, auto: bool) -> Result<ExitPlan> {
    let ctx = BootContext::discover(config)?;

    let mut ui = ConsoleUi::new(io::stdin().lock(), io::stdout());
    if let Some(name) = select {
        ui = ui.with_selection(name);
    }
    if auto {
        ui = ui.non_interactive();
    }

    let plan = BootSelector::new(&ctx).run(&mut ui)?;
    Ok(plan)
}
