//! Procwatch - Process start alerts
//!
//! Runs without a console by default (file logging).
//! `procwatch console` opens one and accepts interaction commands.

// Only show console in console mode
#![windows_subsystem = "windows"]

use anyhow::Result;
use clap::{Parser, Subcommand};
use procwatch::app::{self, AppOptions};
use procwatch::config::ResourcePaths;
use procwatch::logger;
use std::path::PathBuf;
use tracing::info;

/// Procwatch - Alerts for every new process
#[derive(Parser)]
#[command(name = "procwatch")]
#[command(about = "Process start monitor with allow/block rules and stacked alerts")]
struct Cli {
    /// Resources folder (rule lists, custom icons, settings, logs)
    #[arg(long, global = true, value_name = "DIR")]
    resources: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run with console window and stdin commands (for debugging)
    Console,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = ResourcePaths::new(cli.resources.unwrap_or_else(ResourcePaths::default_root));

    match cli.command {
        Some(Commands::Console) => {
            // Create own console (don't attach to parent)
            #[cfg(windows)]
            unsafe {
                let _ = windows::Win32::System::Console::AllocConsole();
            }

            logger::init_console_logger()?;
            info!("Procwatch started in console mode");

            app::run(AppOptions {
                paths,
                interactive: true,
            })?;
        }
        None => {
            // Normal start (without console)
            logger::init_file_logger(&paths.logs())?;
            info!("Procwatch started");

            app::run(AppOptions {
                paths,
                interactive: false,
            })?;
        }
    }

    Ok(())
}
