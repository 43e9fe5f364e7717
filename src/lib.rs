//! Procwatch
//!
//! Watches for newly started processes, filters them through allow/block
//! rules and shows a stack of short-lived alerts for the ones that pass.

pub mod app;
pub mod config;
pub mod console;
pub mod error;
pub mod icons;
pub mod logger;
pub mod notifications;
pub mod orchestrator;
pub mod poller;
pub mod process;
pub mod rules;
