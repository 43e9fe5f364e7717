//! Alert Records
//!
//! One alert per visible decision, from creation to removal.

use crate::icons::Icon;
use crate::process::ProcessIdentity;
use std::time::{Duration, Instant};

pub type AlertId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Queued,
    Visible,
    Hovered,
    Pinned,
    FadingOut,
    Removed,
}

impl AlertState {
    /// Occupies a slot on screen
    pub fn is_shown(self) -> bool {
        matches!(
            self,
            AlertState::Visible | AlertState::Hovered | AlertState::Pinned | AlertState::FadingOut
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Collapsed,
    Expanded,
}

/// Countdown that can be paused without drifting.
///
/// While running, `remaining` is the time left at `started_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTimer {
    remaining: Duration,
    started_at: Option<Instant>,
}

impl DisplayTimer {
    /// Stopped timer holding the full duration
    pub fn new(duration: Duration) -> Self {
        Self {
            remaining: duration,
            started_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Captures the remaining time and stops counting
    pub fn pause(&mut self, now: Instant) {
        if self.started_at.is_some() {
            self.remaining = self.remaining_at(now);
            self.started_at = None;
        }
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(started) => self.remaining.saturating_sub(now.saturating_duration_since(started)),
            None => self.remaining,
        }
    }

    /// Expiry instant, only while running
    pub fn deadline(&self) -> Option<Instant> {
        self.started_at.map(|started| started + self.remaining)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

/// Full lifecycle record of one notification
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: AlertId,
    pub identity: ProcessIdentity,
    pub icon: Icon,
    pub state: AlertState,
    pub created_at: Instant,
    pub slot: Option<usize>,
    pub pinned: bool,
    /// Pointer is over the alert (kept while pinned so unpin returns to Hovered)
    pub hovered: bool,
    /// Presentation flag: a block rule exists for this process
    pub blocked: bool,
    pub timer: DisplayTimer,
    pub fade_deadline: Option<Instant>,
}

impl Alert {
    pub fn new(id: AlertId, identity: ProcessIdentity, icon: Icon, display: Duration, now: Instant) -> Self {
        Self {
            id,
            identity,
            icon,
            state: AlertState::Queued,
            created_at: now,
            slot: None,
            pinned: false,
            hovered: false,
            blocked: false,
            timer: DisplayTimer::new(display),
            fade_deadline: None,
        }
    }

    pub fn display_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Earliest instant at which this alert changes state by itself
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            AlertState::Visible => self.timer.deadline(),
            AlertState::FadingOut => self.fade_deadline,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_pause_resume_keeps_remaining() {
        let t0 = Instant::now();
        let mut timer = DisplayTimer::new(Duration::from_millis(5000));
        assert_eq!(timer.deadline(), None);

        timer.start(t0);
        assert_eq!(timer.deadline(), Some(t0 + Duration::from_millis(5000)));

        timer.pause(t0 + Duration::from_millis(1000));
        assert_eq!(timer.remaining_at(t0 + Duration::from_secs(60)), Duration::from_millis(4000));

        let resumed = t0 + Duration::from_secs(60);
        timer.start(resumed);
        assert_eq!(timer.deadline(), Some(resumed + Duration::from_millis(4000)));
        assert!(!timer.is_expired(resumed + Duration::from_millis(3999)));
        assert!(timer.is_expired(resumed + Duration::from_millis(4000)));
    }

    #[test]
    fn test_timer_double_start_and_pause_are_noops() {
        let t0 = Instant::now();
        let mut timer = DisplayTimer::new(Duration::from_secs(5));
        timer.start(t0);
        timer.start(t0 + Duration::from_secs(2));
        assert_eq!(timer.remaining_at(t0 + Duration::from_secs(2)), Duration::from_secs(3));

        timer.pause(t0 + Duration::from_secs(2));
        timer.pause(t0 + Duration::from_secs(4));
        assert_eq!(timer.remaining_at(t0 + Duration::from_secs(9)), Duration::from_secs(3));
    }

    #[test]
    fn test_remaining_never_underflows() {
        let t0 = Instant::now();
        let mut timer = DisplayTimer::new(Duration::from_millis(10));
        timer.start(t0);
        assert_eq!(timer.remaining_at(t0 + Duration::from_secs(1)), Duration::ZERO);
    }
}
