//! Notification Lifecycle Manager
//!
//! Single owner thread for the alert board. Every mutation is a command on
//! one channel, so slot numbering never sees concurrent writers. Timers are
//! driven by waiting on the channel until the board's next deadline.

use super::alert::{AlertId, AlertState, ViewMode};
use super::board::{AlertBoard, BoardConfig};
use super::surface::{RenderInstruction, RenderSurface};
use crate::icons::Icon;
use crate::process::ProcessIdentity;
use anyhow::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Read-only view of one alert for interaction routing
#[derive(Debug, Clone, PartialEq)]
pub struct AlertInfo {
    pub id: AlertId,
    pub identity: ProcessIdentity,
    pub state: AlertState,
    pub slot: Option<usize>,
    pub pinned: bool,
    pub blocked: bool,
}

enum Command {
    Enqueue {
        id: AlertId,
        identity: ProcessIdentity,
        icon: Icon,
    },
    HoverStart(AlertId),
    HoverEnd(AlertId),
    TogglePin(AlertId),
    Dismiss(AlertId),
    ClearAll,
    SetViewMode(ViewMode),
    SetMaxVisible(usize),
    SetDurations { display: Duration, fade: Duration },
    SetIcon(AlertId, Icon),
    SetBlocked(AlertId, bool),
    Inspect(AlertId, Sender<Option<AlertInfo>>),
    Shutdown,
}

/// Handle to the manager thread; cheap to share behind an `Arc`
pub struct NotificationManager {
    commands: Sender<Command>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationManager {
    pub fn start(config: BoardConfig, surface: Box<dyn RenderSurface>) -> Result<Self> {
        let (tx, rx) = unbounded::<Command>();
        let board = AlertBoard::new(config);

        let worker = thread::Builder::new()
            .name("notifications".to_string())
            .spawn(move || manager_worker(board, surface, rx))?;

        info!(
            "Notification manager started (display {} ms, fade {} ms, max {})",
            config.display.as_millis(),
            config.fade.as_millis(),
            config.max_visible
        );

        Ok(Self {
            commands: tx,
            next_id: AtomicU64::new(1),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Creates an alert and returns its id right away
    pub fn enqueue(&self, identity: ProcessIdentity, icon: Icon) -> AlertId {
        let id = self.reserve_id();
        self.enqueue_reserved(id, identity, icon);
        id
    }

    /// Hands out an id for an alert that is shown later with `enqueue_reserved`
    pub fn reserve_id(&self) -> AlertId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn enqueue_reserved(&self, id: AlertId, identity: ProcessIdentity, icon: Icon) {
        self.send(Command::Enqueue { id, identity, icon });
    }

    pub fn on_hover_start(&self, id: AlertId) {
        self.send(Command::HoverStart(id));
    }

    pub fn on_hover_end(&self, id: AlertId) {
        self.send(Command::HoverEnd(id));
    }

    pub fn toggle_pin(&self, id: AlertId) {
        self.send(Command::TogglePin(id));
    }

    pub fn dismiss(&self, id: AlertId) {
        self.send(Command::Dismiss(id));
    }

    pub fn clear_all(&self) {
        self.send(Command::ClearAll);
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        self.send(Command::SetViewMode(mode));
    }

    pub fn set_max_visible(&self, max_visible: usize) {
        self.send(Command::SetMaxVisible(max_visible));
    }

    pub fn set_durations(&self, display: Duration, fade: Duration) {
        self.send(Command::SetDurations { display, fade });
    }

    pub fn set_icon(&self, id: AlertId, icon: Icon) {
        self.send(Command::SetIcon(id, icon));
    }

    pub fn set_blocked(&self, id: AlertId, blocked: bool) {
        self.send(Command::SetBlocked(id, blocked));
    }

    /// Asks the manager thread for one alert; `None` once it is gone
    pub fn inspect(&self, id: AlertId) -> Option<AlertInfo> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Command::Inspect(id, reply_tx));
        reply_rx.recv_timeout(Duration::from_secs(1)).ok().flatten()
    }

    /// Clears every alert and joins the thread
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        self.send(Command::ClearAll);
        self.send(Command::Shutdown);
        if worker.join().is_err() {
            error!("Notification thread panicked");
        }
        info!("Notification manager stopped");
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Notification thread is gone, command dropped");
        }
    }
}

impl Drop for NotificationManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn manager_worker(mut board: AlertBoard, mut surface: Box<dyn RenderSurface>, commands: Receiver<Command>) {
    debug!("Notification worker started");

    loop {
        let received = match board.next_deadline() {
            Some(deadline) => commands.recv_deadline(deadline),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let now = Instant::now();
        let instructions = match received {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => apply(&mut board, command, now),
            Err(RecvTimeoutError::Timeout) => Vec::new(),
        };

        for instruction in instructions.into_iter().chain(board.tick_at(now)) {
            surface.apply(instruction);
        }
    }

    for instruction in board.clear_all() {
        surface.apply(instruction);
    }
    debug!("Notification worker ended");
}

fn apply(board: &mut AlertBoard, command: Command, now: Instant) -> Vec<RenderInstruction> {
    match command {
        Command::Enqueue { id, identity, icon } => board.enqueue_at(id, identity, icon, now),
        Command::HoverStart(id) => board.hover_start_at(id, now),
        Command::HoverEnd(id) => board.hover_end_at(id, now),
        Command::TogglePin(id) => board.toggle_pin_at(id, now),
        Command::Dismiss(id) => board.dismiss_at(id, now),
        Command::ClearAll => board.clear_all(),
        Command::SetViewMode(mode) => board.set_view_mode(mode),
        Command::SetMaxVisible(max) => board.set_max_visible(max, now),
        Command::SetDurations { display, fade } => {
            board.set_durations(display, fade);
            Vec::new()
        }
        Command::SetIcon(id, icon) => board.set_icon(id, icon),
        Command::SetBlocked(id, blocked) => board.set_blocked(id, blocked),
        Command::Inspect(id, reply) => {
            let info = board.get(id).map(|alert| AlertInfo {
                id,
                identity: alert.identity.clone(),
                state: alert.state,
                slot: alert.slot,
                pinned: alert.pinned,
                blocked: alert.blocked,
            });
            let _ = reply.send(info);
            Vec::new()
        }
        // Handled by the worker loop
        Command::Shutdown => Vec::new(),
    }
}
