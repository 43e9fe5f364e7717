//! Rendering Surface
//!
//! The lifecycle manager only produces instructions. Whatever draws the
//! alerts implements `RenderSurface` and reports interactions back as
//! `InteractionEvent`s.

use super::alert::{AlertId, AlertState, ViewMode};
use crate::icons::Icon;
use crate::process::ProcessIdentity;
use crossbeam_channel::Sender;
use std::time::Duration;
use tracing::{debug, info};

/// What the surface needs to draw a new alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertContent {
    pub identity: ProcessIdentity,
    pub icon: Icon,
    pub view_mode: ViewMode,
    pub blocked: bool,
    /// Length of the fade animation once the alert starts fading
    pub fade: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    State(AlertState),
    ViewMode(ViewMode),
    Icon(Icon),
    Blocked(bool),
}

/// Ordered instructions for the external UI
#[derive(Debug, Clone, PartialEq)]
pub enum RenderInstruction {
    Show {
        id: AlertId,
        content: AlertContent,
        slot: usize,
    },
    Update {
        id: AlertId,
        change: AlertChange,
    },
    Reposition {
        id: AlertId,
        slot: usize,
    },
    Remove {
        id: AlertId,
    },
}

impl RenderInstruction {
    pub fn id(&self) -> AlertId {
        match self {
            RenderInstruction::Show { id, .. }
            | RenderInstruction::Update { id, .. }
            | RenderInstruction::Reposition { id, .. }
            | RenderInstruction::Remove { id } => *id,
        }
    }
}

/// Events reported back by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionEvent {
    HoverStart(AlertId),
    HoverEnd(AlertId),
    Click(AlertId),
    DoubleClick(AlertId),
    RightClick(AlertId),
    PinToggle(AlertId),
    AllowToggle(AlertId),
}

pub trait RenderSurface: Send {
    fn apply(&mut self, instruction: RenderInstruction);
}

/// Stacks alerts upward from the bottom-right corner of the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLayout {
    pub margin_right: i32,
    pub margin_bottom: i32,
    pub collapsed_height: i32,
    pub expanded_height: i32,
    pub spacing: i32,
}

impl Default for StackLayout {
    fn default() -> Self {
        Self {
            margin_right: 4,
            margin_bottom: 50,
            collapsed_height: 40,
            expanded_height: 80,
            spacing: 4,
        }
    }
}

impl StackLayout {
    /// Offset (right, bottom) from the screen corner for a slot
    pub fn offset(&self, slot: usize, view_mode: ViewMode) -> (i32, i32) {
        let height = match view_mode {
            ViewMode::Collapsed => self.collapsed_height,
            ViewMode::Expanded => self.expanded_height,
        };
        let bottom = self.margin_bottom + slot as i32 * (height + self.spacing);
        (self.margin_right, bottom)
    }
}

/// Writes every instruction to the log. Used when no window is attached.
pub struct LogSurface {
    layout: StackLayout,
    view_mode: ViewMode,
}

impl LogSurface {
    pub fn new(layout: StackLayout) -> Self {
        Self {
            layout,
            view_mode: ViewMode::default(),
        }
    }
}

impl RenderSurface for LogSurface {
    fn apply(&mut self, instruction: RenderInstruction) {
        match instruction {
            RenderInstruction::Show { id, content, slot } => {
                self.view_mode = content.view_mode;
                let (right, bottom) = self.layout.offset(slot, self.view_mode);
                info!(
                    "[alert #{}] {}{} (PID: {}) {} [slot {}, {}x{}]",
                    id,
                    content.identity.name,
                    if content.identity.is_elevated { " [ADMIN]" } else { "" },
                    content.identity.pid,
                    content.identity.full_path.as_deref().unwrap_or("(path unavailable)"),
                    slot,
                    right,
                    bottom
                );
            }
            RenderInstruction::Update { id, change } => {
                if let AlertChange::ViewMode(mode) = change {
                    self.view_mode = mode;
                }
                match change {
                    AlertChange::Icon(icon) => debug!("[alert #{}] icon {:?}", id, icon.source),
                    other => info!("[alert #{}] {:?}", id, other),
                }
            }
            RenderInstruction::Reposition { id, slot } => {
                let (right, bottom) = self.layout.offset(slot, self.view_mode);
                debug!("[alert #{}] moved to slot {} ({}x{})", id, slot, right, bottom);
            }
            RenderInstruction::Remove { id } => info!("[alert #{}] removed", id),
        }
    }
}

/// Forwards instructions to another thread, e.g. a window loop
pub struct ChannelSurface {
    sender: Sender<RenderInstruction>,
}

impl ChannelSurface {
    pub fn new(sender: Sender<RenderInstruction>) -> Self {
        Self { sender }
    }
}

impl RenderSurface for ChannelSurface {
    fn apply(&mut self, instruction: RenderInstruction) {
        let _ = self.sender.send(instruction);
    }
}
