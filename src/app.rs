//! Application wiring
//!
//! Builds every component from the resources folder and runs the
//! orchestrator until Ctrl+C, `quit` or end of console input.

use crate::config::{ResourcePaths, Settings};
use crate::console;
use crate::icons::{IconOverrides, IconResolver, SystemIconExtractor};
use crate::notifications::{LogSurface, NotificationManager};
use crate::orchestrator::{Control, Orchestrator};
use crate::poller::ProcessSnapshotPoller;
use crate::process::SystemProcessSource;
use crate::rules::RuleEngine;
use anyhow::{Context, Result};
use chrono::Local;
use crossbeam_channel::{bounded, unbounded};
use std::sync::Arc;
use tracing::{info, warn};

/// Poller → orchestrator queue; overflow is dropped with a warning
const EVENT_QUEUE_CAPACITY: usize = 1000;

pub struct AppOptions {
    pub paths: ResourcePaths,
    /// Read interaction commands from stdin
    pub interactive: bool,
}

pub fn run(options: AppOptions) -> Result<()> {
    let AppOptions { paths, interactive } = options;
    log_banner(&paths);

    paths.ensure_resource_files()?;
    let settings = Settings::load_or_default(&paths.settings());

    let store = paths.rule_store();
    let rules = Arc::new(RuleEngine::new(store.load_all().context("loading rule lists")?));

    let overrides = IconOverrides::load(&paths.custom_icons_table(), &paths.custom_icons_dir()).unwrap_or_else(|e| {
        warn!("Could not load custom icons: {:#}", e);
        IconOverrides::empty()
    });
    let icons = Arc::new(IconResolver::new(Arc::new(SystemIconExtractor), overrides));

    let manager = Arc::new(NotificationManager::start(
        settings.board_config(),
        Box::new(LogSurface::new(settings.layout())),
    )?);

    let (process_tx, process_rx) = bounded(EVENT_QUEUE_CAPACITY);
    let poller = ProcessSnapshotPoller::new(Box::new(SystemProcessSource::new()), process_tx);

    let (control_tx, control_rx) = unbounded();

    // ctrlc handler can fail without a console (windows subsystem)
    let ctrlc_tx = control_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("CTRL+C received, shutting down...");
        let _ = ctrlc_tx.send(Control::Shutdown);
    }) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }

    if interactive {
        console::spawn_console_reader(control_tx.clone())?;
    }

    let orchestrator = Orchestrator::new(paths, settings, rules, store, icons, manager, poller);
    orchestrator.run(process_rx, control_rx)?;

    info!("Procwatch ended");
    Ok(())
}

fn log_banner(paths: &ResourcePaths) {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    info!("Procwatch {} started {}", env!("CARGO_PKG_VERSION"), Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("Computer: {}", host);
    info!("Resources: {}", paths.root.display());
}
