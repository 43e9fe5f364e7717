//! Process Snapshot Poller
//!
//! Enumerates the process table on a fixed interval and emits one event per
//! pid that was not present in the previous snapshot.

use crate::error::EnumerationError;
use crate::process::{ProcessIdentity, ProcessSource};
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lower bound for the poll interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Diff state between two polls
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    /// `None` until the first successful enumeration
    previous: Option<HashSet<u32>>,
}

impl SnapshotDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> Option<&HashSet<u32>> {
        self.previous.as_ref()
    }

    /// Runs one poll cycle. The first successful cycle only records the
    /// baseline, so processes already running at startup are not announced.
    pub fn poll_once(&mut self, source: &mut dyn ProcessSource) -> Result<Vec<ProcessIdentity>, EnumerationError> {
        // On failure the previous snapshot is left untouched
        let records = source.list_processes()?;
        let current: HashSet<u32> = records.iter().map(|r| r.pid).collect();

        let Some(previous) = self.previous.replace(current) else {
            info!("Initial process count: {}", records.len());
            return Ok(Vec::new());
        };

        let started = records
            .into_iter()
            .filter(|record| !previous.contains(&record.pid))
            .map(|record| {
                let is_elevated = source.resolve_elevation(record.pid).unwrap_or_else(|e| {
                    debug!("{}", e);
                    false
                });
                ProcessIdentity::new(record, is_elevated)
            })
            .collect();

        Ok(started)
    }
}

/// Background poller thread
pub struct ProcessSnapshotPoller {
    source: Option<Box<dyn ProcessSource>>,
    sender: Sender<ProcessIdentity>,
    interval_ms: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
    handle: Option<JoinHandle<Box<dyn ProcessSource>>>,
}

impl ProcessSnapshotPoller {
    pub fn new(source: Box<dyn ProcessSource>, sender: Sender<ProcessIdentity>) -> Self {
        Self {
            source: Some(source),
            sender,
            interval_ms: Arc::new(AtomicU64::new(500)),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Starts polling. Calling it while running only updates the interval.
    pub fn start(&mut self, interval: Duration) -> Result<()> {
        self.set_interval(interval);
        if self.handle.is_some() {
            return Ok(());
        }

        let mut source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("process source is gone"))?;

        let (wake_tx, wake_rx) = bounded::<()>(1);
        self.shutdown.store(false, Ordering::SeqCst);

        let sender = self.sender.clone();
        let interval_ms = self.interval_ms.clone();
        let shutdown = self.shutdown.clone();

        let handle = thread::Builder::new()
            .name("process-poller".to_string())
            .spawn(move || {
                poll_worker(source.as_mut(), sender, interval_ms, shutdown, wake_rx);
                source
            })?;

        self.wake = Some(wake_tx);
        self.handle = Some(handle);
        info!("Process poller started ({} ms)", self.interval_ms.load(Ordering::Relaxed));
        Ok(())
    }

    /// Applies to the next sleep of a running poller
    pub fn set_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        self.interval_ms.store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Stops the thread. An in-flight enumeration finishes first; the
    /// snapshot is only replaced after a complete enumeration.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(wake) = self.wake.take() {
            let _ = wake.try_send(());
        }

        match handle.join() {
            // Keep the source so the poller can be restarted
            Ok(source) => self.source = Some(source),
            Err(_) => error!("Process poller thread panicked"),
        }
        info!("Process poller stopped");
    }
}

impl Drop for ProcessSnapshotPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_worker(
    source: &mut dyn ProcessSource,
    sender: Sender<ProcessIdentity>,
    interval_ms: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    wake: Receiver<()>,
) {
    let mut diff = SnapshotDiff::new();

    while !shutdown.load(Ordering::Relaxed) {
        let started_at = Instant::now();

        match diff.poll_once(source) {
            Ok(started) => {
                for identity in started {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    match sender.try_send(identity) {
                        Ok(()) => {}
                        Err(TrySendError::Full(identity)) => {
                            warn!(pid = identity.pid, "Event queue full, dropping {}", identity.name);
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!("Event receiver gone, poller exiting");
                            return;
                        }
                    }
                }
            }
            Err(e) => warn!("{}, skipping poll cycle", e),
        }

        // Sleep for the rest of the interval, waking early on stop
        let interval = Duration::from_millis(interval_ms.load(Ordering::Relaxed));
        let remaining = interval.saturating_sub(started_at.elapsed());
        match wake.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Poll worker ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttributeResolutionError;
    use crate::process::ProcessRecord;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted snapshots; `None` is an enumeration failure
    struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Option<Vec<u32>>>>>,
        elevated: HashSet<u32>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<Vec<u32>>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                elevated: HashSet::new(),
            }
        }
    }

    impl ProcessSource for ScriptedSource {
        fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, EnumerationError> {
            match self.script.lock().pop_front() {
                Some(Some(pids)) => Ok(pids
                    .into_iter()
                    .map(|pid| ProcessRecord::new(pid, &format!("p{}.exe", pid), None))
                    .collect()),
                Some(None) => Err(EnumerationError("access denied".to_string())),
                // Script exhausted: repeat an empty but valid table
                None => Ok(Vec::new()),
            }
        }

        fn resolve_elevation(&self, pid: u32) -> Result<bool, AttributeResolutionError> {
            if pid == 99 {
                return Err(AttributeResolutionError {
                    pid,
                    attribute: "elevation",
                    reason: "protected".to_string(),
                });
            }
            Ok(self.elevated.contains(&pid))
        }
    }

    fn pids(events: &[ProcessIdentity]) -> Vec<u32> {
        events.iter().map(|e| e.pid).collect()
    }

    #[test]
    fn test_first_poll_is_baseline() {
        let mut source = ScriptedSource::new(vec![Some(vec![1, 2])]);
        let mut diff = SnapshotDiff::new();
        assert!(diff.poll_once(&mut source).unwrap().is_empty());
        assert_eq!(diff.previous().unwrap().len(), 2);
    }

    #[test]
    fn test_identical_snapshots_emit_nothing() {
        let mut source = ScriptedSource::new(vec![Some(vec![1, 2]), Some(vec![1, 2]), Some(vec![2, 1])]);
        let mut diff = SnapshotDiff::new();
        diff.poll_once(&mut source).unwrap();
        assert!(diff.poll_once(&mut source).unwrap().is_empty());
        assert!(diff.poll_once(&mut source).unwrap().is_empty());
    }

    #[test]
    fn test_diff_emits_only_new_pid() {
        let mut source = ScriptedSource::new(vec![Some(vec![1, 2]), Some(vec![2, 3])]);
        let mut diff = SnapshotDiff::new();
        diff.poll_once(&mut source).unwrap();

        let events = diff.poll_once(&mut source).unwrap();
        assert_eq!(pids(&events), vec![3]);
        assert_eq!(events[0].name, "p3.exe");
        assert_eq!(events[0].full_path, None);
    }

    #[test]
    fn test_enumeration_failure_keeps_previous_snapshot() {
        let mut source = ScriptedSource::new(vec![Some(vec![1, 2]), None, Some(vec![1, 2, 5])]);
        let mut diff = SnapshotDiff::new();
        diff.poll_once(&mut source).unwrap();

        assert!(diff.poll_once(&mut source).is_err());
        assert_eq!(diff.previous().unwrap(), &HashSet::from([1, 2]));

        // Nothing spurious after recovery, only the real newcomer
        assert_eq!(pids(&diff.poll_once(&mut source).unwrap()), vec![5]);
    }

    #[test]
    fn test_attribute_failure_degrades_single_record() {
        let mut source = ScriptedSource::new(vec![Some(vec![1]), Some(vec![1, 7, 99])]);
        source.elevated.insert(7);
        let mut diff = SnapshotDiff::new();
        diff.poll_once(&mut source).unwrap();

        let events = diff.poll_once(&mut source).unwrap();
        assert_eq!(pids(&events), vec![7, 99]);
        assert!(events[0].is_elevated);
        assert!(!events[1].is_elevated);
    }

    #[test]
    fn test_poller_thread_emits_and_stops() {
        let source = ScriptedSource::new(vec![Some(vec![1]), Some(vec![1, 2]), Some(vec![1, 2, 3])]);
        let (tx, rx) = bounded(16);
        let mut poller = ProcessSnapshotPoller::new(Box::new(source), tx);

        poller.start(Duration::from_millis(50)).unwrap();
        assert!(poller.is_running());

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first.pid, second.pid), (2, 3));

        poller.stop();
        assert!(!poller.is_running());
        // Idempotent
        poller.stop();
    }

    #[test]
    fn test_interval_is_clamped() {
        let (tx, _rx) = bounded(1);
        let poller = ProcessSnapshotPoller::new(Box::new(ScriptedSource::new(Vec::new())), tx);
        poller.set_interval(Duration::from_millis(1));
        assert_eq!(poller.interval_ms.load(Ordering::Relaxed), MIN_INTERVAL.as_millis() as u64);
    }
}
