//! Alert Board
//!
//! Pure lifecycle state machine. Owns every alert, its timers and its slot.
//! Every operation takes the current `Instant` and returns the render
//! instructions it caused, so the whole lifecycle is testable without sleeping.

use super::alert::{Alert, AlertId, AlertState, DisplayTimer, ViewMode};
use super::surface::{AlertChange, AlertContent, RenderInstruction};
use crate::icons::Icon;
use crate::process::ProcessIdentity;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Timing and capacity policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardConfig {
    pub display: Duration,
    pub fade: Duration,
    pub max_visible: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            display: Duration::from_millis(5000),
            fade: Duration::from_millis(2000),
            max_visible: 20,
        }
    }
}

type Instructions = Vec<RenderInstruction>;

pub struct AlertBoard {
    config: BoardConfig,
    view_mode: ViewMode,
    alerts: HashMap<AlertId, Alert>,
    /// Index = slot number
    slots: Vec<AlertId>,
    /// FIFO of alerts waiting for a slot
    queue: VecDeque<AlertId>,
}

impl AlertBoard {
    pub fn new(config: BoardConfig) -> Self {
        Self {
            config: BoardConfig {
                max_visible: config.max_visible.max(1),
                ..config
            },
            view_mode: ViewMode::default(),
            alerts: HashMap::new(),
            slots: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn config(&self) -> BoardConfig {
        self.config
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn get(&self, id: AlertId) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    /// `Removed` for alerts that no longer exist
    pub fn state(&self, id: AlertId) -> AlertState {
        self.alerts.get(&id).map_or(AlertState::Removed, |a| a.state)
    }

    pub fn slot_of(&self, id: AlertId) -> Option<usize> {
        self.alerts.get(&id).and_then(|a| a.slot)
    }

    pub fn remaining_at(&self, id: AlertId, now: Instant) -> Option<Duration> {
        self.alerts.get(&id).map(|a| a.timer.remaining_at(now))
    }

    pub fn shown_count(&self) -> usize {
        self.slots.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Alert ids in slot order
    pub fn slots(&self) -> &[AlertId] {
        &self.slots
    }

    /// Earliest timer that needs a `tick_at`
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|id| self.alerts.get(id))
            .filter_map(Alert::next_deadline)
            .min()
    }

    /// New alert. Takes a slot immediately when one is free, else waits.
    pub fn enqueue_at(&mut self, id: AlertId, identity: ProcessIdentity, icon: Icon, now: Instant) -> Instructions {
        let mut out = Vec::new();
        let alert = Alert::new(id, identity, icon, self.config.display, now);
        self.alerts.insert(id, alert);
        self.queue.push_back(id);
        self.promote(now, &mut out);

        if self.state(id) == AlertState::Queued {
            debug!("Alert #{} queued ({} waiting)", id, self.queue.len());
        }
        out
    }

    pub fn hover_start_at(&mut self, id: AlertId, now: Instant) -> Instructions {
        let display = self.config.display;
        let Some(alert) = self.alerts.get_mut(&id) else {
            return Vec::new();
        };

        match alert.state {
            AlertState::Visible => {
                alert.timer.pause(now);
            }
            AlertState::FadingOut => {
                // Fade is cancelled and the alert gets a fresh display period
                alert.fade_deadline = None;
                alert.timer = DisplayTimer::new(display);
            }
            AlertState::Pinned => {
                alert.hovered = true;
                return Vec::new();
            }
            AlertState::Hovered | AlertState::Queued | AlertState::Removed => return Vec::new(),
        }

        alert.hovered = true;
        alert.state = AlertState::Hovered;
        vec![state_update(id, AlertState::Hovered)]
    }

    pub fn hover_end_at(&mut self, id: AlertId, now: Instant) -> Instructions {
        let Some(alert) = self.alerts.get_mut(&id) else {
            return Vec::new();
        };
        alert.hovered = false;

        if alert.state != AlertState::Hovered {
            return Vec::new();
        }
        alert.timer.start(now);
        alert.state = AlertState::Visible;
        vec![state_update(id, AlertState::Visible)]
    }

    /// Pin from Visible/Hovered, unpin back to where it was
    pub fn toggle_pin_at(&mut self, id: AlertId, now: Instant) -> Instructions {
        let Some(alert) = self.alerts.get_mut(&id) else {
            return Vec::new();
        };

        let next = match alert.state {
            AlertState::Visible | AlertState::Hovered => {
                alert.timer.pause(now);
                alert.pinned = true;
                AlertState::Pinned
            }
            AlertState::Pinned => {
                alert.pinned = false;
                if alert.hovered {
                    AlertState::Hovered
                } else {
                    alert.timer.start(now);
                    AlertState::Visible
                }
            }
            AlertState::Queued | AlertState::FadingOut | AlertState::Removed => return Vec::new(),
        };

        alert.state = next;
        vec![state_update(id, next)]
    }

    /// Removes one alert right away, from any state
    pub fn dismiss_at(&mut self, id: AlertId, now: Instant) -> Instructions {
        let mut out = Vec::new();
        self.remove(id, now, &mut out);
        out
    }

    /// Drops everything, bypassing the fade
    pub fn clear_all(&mut self) -> Instructions {
        let out = self
            .slots
            .drain(..)
            .map(|id| RenderInstruction::Remove { id })
            .collect();
        self.queue.clear();
        self.alerts.clear();
        out
    }

    /// Advances timers: expired display starts the fade, expired fade removes
    pub fn tick_at(&mut self, now: Instant) -> Instructions {
        let mut out = Vec::new();
        let fade = self.config.fade;

        let mut finished = Vec::new();
        for id in &self.slots {
            let Some(alert) = self.alerts.get_mut(id) else {
                continue;
            };
            match alert.state {
                AlertState::Visible if alert.timer.is_expired(now) => {
                    alert.timer.pause(now);
                    alert.state = AlertState::FadingOut;
                    alert.fade_deadline = Some(now + fade);
                    out.push(state_update(*id, AlertState::FadingOut));
                }
                AlertState::FadingOut if alert.fade_deadline.is_some_and(|d| now >= d) => {
                    finished.push(*id);
                }
                _ => {}
            }
        }

        for id in finished {
            self.remove(id, now, &mut out);
        }
        out
    }

    /// Applies to every current and future alert
    pub fn set_view_mode(&mut self, mode: ViewMode) -> Instructions {
        if self.view_mode == mode {
            return Vec::new();
        }
        self.view_mode = mode;
        self.slots
            .iter()
            .map(|&id| RenderInstruction::Update {
                id,
                change: AlertChange::ViewMode(mode),
            })
            .collect()
    }

    /// Raising the limit promotes queued alerts; lowering never evicts
    pub fn set_max_visible(&mut self, max_visible: usize, now: Instant) -> Instructions {
        self.config.max_visible = max_visible.max(1);
        let mut out = Vec::new();
        self.promote(now, &mut out);
        out
    }

    /// New durations apply to alerts created afterwards
    pub fn set_durations(&mut self, display: Duration, fade: Duration) {
        self.config.display = display;
        self.config.fade = fade;
    }

    pub fn set_icon(&mut self, id: AlertId, icon: Icon) -> Instructions {
        let Some(alert) = self.alerts.get_mut(&id) else {
            return Vec::new();
        };
        alert.icon = icon.clone();
        if alert.state.is_shown() {
            vec![RenderInstruction::Update {
                id,
                change: AlertChange::Icon(icon),
            }]
        } else {
            Vec::new()
        }
    }

    pub fn set_blocked(&mut self, id: AlertId, blocked: bool) -> Instructions {
        let Some(alert) = self.alerts.get_mut(&id) else {
            return Vec::new();
        };
        if alert.blocked == blocked {
            return Vec::new();
        }
        alert.blocked = blocked;
        if alert.state.is_shown() {
            vec![RenderInstruction::Update {
                id,
                change: AlertChange::Blocked(blocked),
            }]
        } else {
            Vec::new()
        }
    }

    fn remove(&mut self, id: AlertId, now: Instant, out: &mut Instructions) {
        let Some(alert) = self.alerts.remove(&id) else {
            return;
        };

        match alert.slot {
            Some(slot) => {
                self.slots.remove(slot);
                out.push(RenderInstruction::Remove { id });

                // Compact everything above the freed slot
                for (index, moved) in self.slots.iter().enumerate().skip(slot) {
                    if let Some(a) = self.alerts.get_mut(moved) {
                        a.slot = Some(index);
                    }
                    out.push(RenderInstruction::Reposition { id: *moved, slot: index });
                }
                self.promote(now, out);
            }
            // Never shown, so the surface has nothing to remove
            None => self.queue.retain(|queued| *queued != id),
        }
    }

    /// Fills free slots from the queue, oldest first
    fn promote(&mut self, now: Instant, out: &mut Instructions) {
        while self.slots.len() < self.config.max_visible {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some(alert) = self.alerts.get_mut(&id) else {
                continue;
            };

            let slot = self.slots.len();
            self.slots.push(id);
            alert.slot = Some(slot);
            alert.state = AlertState::Visible;
            alert.timer.start(now);

            out.push(RenderInstruction::Show {
                id,
                content: AlertContent {
                    identity: alert.identity.clone(),
                    icon: alert.icon.clone(),
                    view_mode: self.view_mode,
                    blocked: alert.blocked,
                    fade: self.config.fade,
                },
                slot,
            });
        }
    }
}

fn state_update(id: AlertId, state: AlertState) -> RenderInstruction {
    RenderInstruction::Update {
        id,
        change: AlertChange::State(state),
    }
}
