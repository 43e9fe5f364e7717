//! Notifications
//!
//! Stacked, time-bounded alerts: pure board state machine, the thread that
//! owns it, and the surface abstraction it renders through.

pub mod alert;
pub mod board;
pub mod manager;
pub mod surface;

pub use alert::{AlertId, AlertState, ViewMode};
pub use board::{AlertBoard, BoardConfig};
pub use manager::{AlertInfo, NotificationManager};
pub use surface::{
    AlertChange, AlertContent, ChannelSurface, InteractionEvent, LogSurface, RenderInstruction,
    RenderSurface, StackLayout,
};
