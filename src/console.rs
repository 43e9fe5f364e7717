//! Console Input
//!
//! Stands in for mouse interaction when running `procwatch console`:
//! each stdin line becomes one `Control` for the orchestrator.

use crate::notifications::{AlertId, InteractionEvent, ViewMode};
use crate::orchestrator::Control;
use anyhow::{anyhow, bail, Result};
use crossbeam_channel::Sender;
use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub const HELP: &str = "\
Commands:
  hover <id>      start hovering an alert
  leave <id>      stop hovering
  click <id>      open the file location
  dbl <id>        dismiss
  block <id>      toggle block rule
  allow <id>      toggle allow rule
  pin <id>        toggle pin
  dismiss <id>    dismiss
  clear           remove all alerts
  view expanded|collapsed
  notify on|off
  blocking on|off
  quit";

/// `Ok(None)` for blank lines and `help`
pub fn parse_command(line: &str) -> Result<Option<Control>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();
    if words.next().is_some() {
        bail!("too many arguments for '{}'", command);
    }

    let control = match command.to_lowercase().as_str() {
        "help" | "?" => return Ok(None),
        "hover" => Control::Interaction(InteractionEvent::HoverStart(alert_id(argument)?)),
        "leave" => Control::Interaction(InteractionEvent::HoverEnd(alert_id(argument)?)),
        "click" => Control::Interaction(InteractionEvent::Click(alert_id(argument)?)),
        "dbl" | "dismiss" => Control::Interaction(InteractionEvent::DoubleClick(alert_id(argument)?)),
        "block" => Control::Interaction(InteractionEvent::RightClick(alert_id(argument)?)),
        "allow" => Control::Interaction(InteractionEvent::AllowToggle(alert_id(argument)?)),
        "pin" => Control::Interaction(InteractionEvent::PinToggle(alert_id(argument)?)),
        "clear" => Control::ClearAll,
        "view" => match argument {
            Some("expanded") => Control::SetViewMode(ViewMode::Expanded),
            Some("collapsed") => Control::SetViewMode(ViewMode::Collapsed),
            _ => bail!("usage: view expanded|collapsed"),
        },
        "notify" => Control::SetNotifications(switch(argument, "notify")?),
        "blocking" => Control::SetBlocking(switch(argument, "blocking")?),
        "quit" | "exit" => Control::Shutdown,
        other => bail!("unknown command '{}'", other),
    };
    Ok(Some(control))
}

fn alert_id(argument: Option<&str>) -> Result<AlertId> {
    let text = argument.ok_or_else(|| anyhow!("missing alert id"))?;
    text.trim_start_matches('#')
        .parse()
        .map_err(|_| anyhow!("'{}' is not an alert id", text))
}

fn switch(argument: Option<&str>, command: &str) -> Result<bool> {
    match argument {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => bail!("usage: {} on|off", command),
    }
}

/// Reads stdin until EOF or `quit`. EOF also requests shutdown.
pub fn spawn_console_reader(controls: Sender<Control>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            info!("Type 'help' for commands");
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("help") {
                    println!("{}", HELP);
                    continue;
                }
                match parse_command(&line) {
                    Ok(Some(control)) => {
                        let quit = control == Control::Shutdown;
                        if controls.send(control).is_err() || quit {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            debug!("Console input closed");
            let _ = controls.send(Control::Shutdown);
        })?;
    Ok(handle)
}
