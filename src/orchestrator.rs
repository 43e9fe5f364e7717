//! Orchestrator
//!
//! Wires poller → rule engine → notification manager, and routes user
//! interactions back into the rules and the alerts.

use crate::config::{FileWatch, ResourcePaths, Settings};
use crate::icons::{cache_key, Icon, IconOverrides, IconResolver};
use crate::notifications::{AlertId, InteractionEvent, NotificationManager, ViewMode};
use crate::poller::ProcessSnapshotPoller;
use crate::process::ProcessIdentity;
use crate::rules::{Decision, ListKind, Rule, RuleEngine, RuleKind, RuleStore};
use anyhow::{Context, Result};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Commands from the UI side: surface interactions plus app-level switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Interaction(InteractionEvent),
    ClearAll,
    SetViewMode(ViewMode),
    SetNotifications(bool),
    SetBlocking(bool),
    Shutdown,
}

/// At most `limit` events per rolling window
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    recent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn per_second(limit: u32) -> Self {
        Self {
            limit: (limit as usize).max(1),
            window: Duration::from_secs(1),
            recent: VecDeque::new(),
        }
    }

    pub fn set_limit(&mut self, limit: u32) {
        self.limit = (limit as usize).max(1);
    }

    /// Records the event if allowed
    pub fn allow_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.limit {
            return false;
        }
        self.recent.push_back(now);
        true
    }
}

type Revealer = Box<dyn Fn(&str) -> Result<()> + Send>;

/// Visible alert held back until its icon arrives or `iconWaitMs` passes
struct WaitingAlert {
    id: AlertId,
    key: String,
    identity: ProcessIdentity,
    deadline: Instant,
}

/// Icon resolutions running off the orchestrator thread, one per key
struct PendingIcons {
    resolved_tx: Sender<(String, Icon)>,
    resolved_rx: Receiver<(String, Icon)>,
    in_flight: HashSet<String>,
    waiting: Vec<WaitingAlert>,
    /// Alerts already shown with the placeholder
    late: HashMap<String, Vec<AlertId>>,
}

impl PendingIcons {
    fn new() -> Self {
        let (resolved_tx, resolved_rx) = unbounded();
        Self {
            resolved_tx,
            resolved_rx,
            in_flight: HashSet::new(),
            waiting: Vec::new(),
            late: HashMap::new(),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.iter().map(|w| w.deadline).min()
    }
}

pub struct Orchestrator {
    paths: ResourcePaths,
    settings: Settings,
    rules: Arc<RuleEngine>,
    store: RuleStore,
    icons: Arc<IconResolver>,
    manager: Arc<NotificationManager>,
    poller: ProcessSnapshotPoller,
    limiter: RateLimiter,
    settings_watch: FileWatch,
    icons_watch: FileWatch,
    pending: PendingIcons,
    reveal: Revealer,
}

impl Orchestrator {
    pub fn new(
        paths: ResourcePaths,
        settings: Settings,
        rules: Arc<RuleEngine>,
        store: RuleStore,
        icons: Arc<IconResolver>,
        manager: Arc<NotificationManager>,
        poller: ProcessSnapshotPoller,
    ) -> Self {
        rules.set_blocking_enabled(settings.blocking_enabled);
        manager.set_view_mode(settings.view_mode());

        Self {
            settings_watch: FileWatch::new(paths.settings()),
            icons_watch: FileWatch::new(paths.custom_icons_table()),
            limiter: RateLimiter::per_second(settings.rate_limit_per_second),
            paths,
            settings,
            rules,
            store,
            icons,
            manager,
            poller,
            pending: PendingIcons::new(),
            reveal: Box::new(reveal_in_file_manager),
        }
    }

    /// Replaces what a click does with the alert's path
    pub fn with_revealer(mut self, reveal: impl Fn(&str) -> Result<()> + Send + 'static) -> Self {
        self.reveal = Box::new(reveal);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs until `Control::Shutdown` or until the poller goes away
    pub fn run(mut self, processes: Receiver<ProcessIdentity>, controls: Receiver<Control>) -> Result<()> {
        self.poller.start(self.settings.poll_interval())?;
        let mut next_maintenance = Instant::now() + self.settings.reload_interval();
        let resolved = self.pending.resolved_rx.clone();

        loop {
            let wake_at = match self.pending.next_deadline() {
                Some(deadline) => deadline.min(next_maintenance),
                None => next_maintenance,
            };
            let timeout = wake_at.saturating_duration_since(Instant::now());
            select! {
                recv(processes) -> msg => match msg {
                    Ok(identity) => {
                        self.handle_process_started(identity, Instant::now());
                    }
                    Err(_) => break,
                },
                recv(controls) -> msg => match msg {
                    Ok(Control::Shutdown) | Err(_) => break,
                    Ok(control) => self.handle_control(control),
                },
                recv(resolved) -> msg => {
                    if let Ok((key, icon)) = msg {
                        self.icon_resolved(key, icon);
                    }
                },
                default(timeout) => {}
            }
            self.expire_icon_waits(Instant::now());

            if Instant::now() >= next_maintenance {
                self.maintenance();
                next_maintenance = Instant::now() + self.settings.reload_interval();
            }
        }

        self.shutdown();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down...");
        self.poller.stop();
        self.manager.shutdown();
    }

    /// Decides and, if visible, shows an alert. Returns its id.
    pub fn handle_process_started(&mut self, identity: ProcessIdentity, now: Instant) -> Option<AlertId> {
        let (decision, tier) = self.rules.decide_traced(&identity);
        if decision == Decision::Hidden {
            debug!(pid = identity.pid, ?tier, "Hidden: {}", identity.display_target());
            return None;
        }

        if !self.settings.notifications_enabled {
            debug!(pid = identity.pid, "Notifications disabled, not showing {}", identity.name);
            return None;
        }

        if !self.limiter.allow_at(now) {
            warn!(pid = identity.pid, "Rate limit reached, dropping alert for {}", identity.name);
            return None;
        }

        info!(
            pid = identity.pid,
            elevated = identity.is_elevated,
            ?tier,
            "New process: {}",
            identity.display_target()
        );
        Some(self.enqueue_with_icon(identity, now))
    }

    /// Shows the alert now if the icon is known. Otherwise the alert waits
    /// for at most `iconWaitMs` while one background thread per executable
    /// resolves the icon; late icons arrive through `set_icon`.
    fn enqueue_with_icon(&mut self, identity: ProcessIdentity, now: Instant) -> AlertId {
        if let Some(icon) = self.icons.peek(&identity) {
            return self.manager.enqueue(identity, icon);
        }

        let key = cache_key(&identity);
        let id = self.manager.reserve_id();
        self.start_icon_resolution(&key, &identity);

        let wait = self.settings.icon_wait();
        if wait.is_zero() {
            self.manager.enqueue_reserved(id, identity, Icon::placeholder());
            self.pending.late.entry(key).or_default().push(id);
        } else {
            self.pending.waiting.push(WaitingAlert {
                id,
                key,
                identity,
                deadline: now + wait,
            });
        }
        id
    }

    fn start_icon_resolution(&mut self, key: &str, identity: &ProcessIdentity) {
        if !self.pending.in_flight.insert(key.to_string()) {
            return;
        }

        let icons = self.icons.clone();
        let resolved = self.pending.resolved_tx.clone();
        let resolved_key = key.to_string();
        let lookup = identity.clone();

        // Resolve icon in background, the select loop keeps running
        let spawned = thread::Builder::new()
            .name("icon-resolve".to_string())
            .spawn(move || {
                let icon = icons.resolve(&lookup);
                let _ = resolved.send((resolved_key, icon));
            });
        if let Err(e) = spawned {
            warn!("Could not start icon thread: {}", e);
            self.pending.in_flight.remove(key);
        }
    }

    /// Shows every alert waiting on `key` and upgrades the ones already shown
    pub fn icon_resolved(&mut self, key: String, icon: Icon) {
        self.pending.in_flight.remove(&key);

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending.waiting)
            .into_iter()
            .partition(|w| w.key == key);
        self.pending.waiting = waiting;
        for alert in ready {
            self.manager.enqueue_reserved(alert.id, alert.identity, icon.clone());
        }

        let late = self.pending.late.remove(&key).unwrap_or_default();
        if !icon.is_placeholder() {
            for id in late {
                self.manager.set_icon(id, icon.clone());
            }
        }
    }

    /// Shows alerts whose icon wait ran out with the placeholder
    pub fn expire_icon_waits(&mut self, now: Instant) {
        if self.pending.waiting.iter().all(|w| w.deadline > now) {
            return;
        }
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending.waiting)
            .into_iter()
            .partition(|w| w.deadline <= now);
        self.pending.waiting = waiting;

        for alert in expired {
            debug!("Icon for {} not ready, showing default", alert.key);
            self.manager.enqueue_reserved(alert.id, alert.identity, Icon::placeholder());
            self.pending.late.entry(alert.key).or_default().push(alert.id);
        }
    }

    /// Applies finished icon resolutions and expired waits without blocking
    pub fn process_icon_updates(&mut self, now: Instant) {
        let resolved: Vec<(String, Icon)> = self.pending.resolved_rx.try_iter().collect();
        for (key, icon) in resolved {
            self.icon_resolved(key, icon);
        }
        self.expire_icon_waits(now);
    }

    pub fn waiting_alerts(&self) -> usize {
        self.pending.waiting.len()
    }

    pub fn handle_control(&mut self, control: Control) {
        match control {
            Control::Interaction(event) => self.handle_interaction(event),
            Control::ClearAll => self.manager.clear_all(),
            Control::SetViewMode(mode) => {
                self.manager.set_view_mode(mode);
                self.settings.expanded_view = mode == ViewMode::Expanded;
                self.persist_settings();
            }
            Control::SetNotifications(enabled) => {
                info!("Notifications {}", if enabled { "enabled" } else { "disabled" });
                self.settings.notifications_enabled = enabled;
                self.persist_settings();
            }
            Control::SetBlocking(enabled) => {
                self.rules.set_blocking_enabled(enabled);
                self.settings.blocking_enabled = enabled;
                self.persist_settings();
            }
            Control::Shutdown => {}
        }
    }

    pub fn handle_interaction(&mut self, event: InteractionEvent) {
        match event {
            InteractionEvent::HoverStart(id) => self.manager.on_hover_start(id),
            InteractionEvent::HoverEnd(id) => self.manager.on_hover_end(id),
            InteractionEvent::PinToggle(id) => self.manager.toggle_pin(id),
            InteractionEvent::DoubleClick(id) => self.manager.dismiss(id),
            InteractionEvent::Click(id) => self.reveal_alert(id),
            InteractionEvent::RightClick(id) => self.toggle_rule(id, ListKind::Block),
            InteractionEvent::AllowToggle(id) => self.toggle_rule(id, ListKind::Allow),
        }
    }

    fn reveal_alert(&self, id: AlertId) {
        let Some(info) = self.manager.inspect(id) else {
            debug!("Click on unknown alert #{}", id);
            return;
        };
        match info.identity.full_path.as_deref() {
            Some(path) => {
                if let Err(e) = (self.reveal)(path) {
                    error!("Could not open file location: {:#}", e);
                }
            }
            None => warn!("No path known for {}", info.identity.name),
        }
    }

    /// Adds or removes the alert's path rule (name rule without a path)
    fn toggle_rule(&mut self, id: AlertId, list: ListKind) {
        let Some(info) = self.manager.inspect(id) else {
            debug!("Toggle on unknown alert #{}", id);
            return;
        };

        let (kind, pattern) = match info.identity.full_path.as_deref() {
            Some(path) => (RuleKind::ExactPath, path),
            None => (RuleKind::Name, info.identity.name.as_str()),
        };

        let rule = match Rule::new(kind, pattern, list) {
            Ok(rule) => rule,
            Err(e) => {
                warn!("Cannot create {} rule: {}", list, e);
                return;
            }
        };

        let present = self.rules.contains(kind, pattern, list);

        // The file goes first so a failed write leaves the live rules untouched
        let persisted = if present {
            self.store.remove(&rule)
        } else {
            self.store.append(&rule)
        };
        if let Err(e) = persisted {
            error!("Could not update {} list: {:#}", list, e);
            return;
        }

        let applied = if present {
            self.rules.remove_rule(kind, pattern, list)
        } else {
            self.rules.add_rule(kind, pattern, list)
        };
        if let Err(e) = applied {
            error!("Could not apply {} rule: {}", list, e);
            return;
        }

        if list == ListKind::Block {
            self.manager.set_blocked(id, !present);
        }
    }

    /// Picks up external edits of rules, icons and settings
    pub fn maintenance(&mut self) {
        if self.store.has_changed() {
            match self.store.load_all() {
                Ok(rules) => {
                    self.rules.reload(rules);
                    info!("Rule lists reloaded");
                }
                Err(e) => error!("Could not reload rule lists: {:#}", e),
            }
        }

        if self.icons_watch.poll_changed() {
            match IconOverrides::load(&self.paths.custom_icons_table(), &self.paths.custom_icons_dir()) {
                Ok(overrides) => self.icons.reload_overrides(overrides),
                Err(e) => error!("Could not reload custom icons: {:#}", e),
            }
        }

        if self.settings_watch.poll_changed() {
            let settings = Settings::load_or_default(self.settings_watch.path());
            self.apply_settings(settings);
        }
    }

    pub fn apply_settings(&mut self, settings: Settings) {
        if settings == self.settings {
            return;
        }
        info!("Applying settings");

        self.poller.set_interval(settings.poll_interval());
        let board = settings.board_config();
        self.manager.set_durations(board.display, board.fade);
        self.manager.set_max_visible(board.max_visible);
        self.manager.set_view_mode(settings.view_mode());
        self.rules.set_blocking_enabled(settings.blocking_enabled);
        self.limiter.set_limit(settings.rate_limit_per_second);
        self.settings = settings;
    }

    fn persist_settings(&mut self) {
        if let Err(e) = self.settings.save(&self.paths.settings()) {
            error!("Could not save settings: {:#}", e);
        }
        self.settings_watch.mark_seen();
    }
}

/// Opens the platform file manager at the executable
pub fn reveal_in_file_manager(path: &str) -> Result<()> {
    info!("Opening file location: {}", path);

    #[cfg(windows)]
    {
        std::process::Command::new("explorer.exe")
            .arg(format!("/select,{}", path))
            .spawn()
            .context("starting explorer.exe")?;
    }

    #[cfg(not(windows))]
    {
        use std::path::Path;
        let dir = Path::new(path).parent().unwrap_or_else(|| Path::new("/"));
        std::process::Command::new("xdg-open")
            .arg(dir)
            .spawn()
            .context("starting xdg-open")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icons::IconExtractor;
    use crate::error::{AttributeResolutionError, EnumerationError, ExtractionUnavailable};
    use crate::notifications::{AlertChange, ChannelSurface, RenderInstruction};
    use crate::process::{ProcessRecord, ProcessSource};
    use crossbeam_channel::{bounded, unbounded};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::fs;
    use tempfile::TempDir;

    struct EmptySource;

    impl ProcessSource for EmptySource {
        fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, EnumerationError> {
            Ok(Vec::new())
        }

        fn resolve_elevation(&self, _pid: u32) -> Result<bool, AttributeResolutionError> {
            Ok(false)
        }
    }

    struct FixedExtractor;

    impl IconExtractor for FixedExtractor {
        fn extract(&self, path: &str) -> Result<Vec<u8>, ExtractionUnavailable> {
            Ok(path.as_bytes().to_vec())
        }
    }

    /// Blocks until released, counting calls
    struct GatedExtractor {
        calls: AtomicUsize,
        release: Receiver<()>,
    }

    impl IconExtractor for GatedExtractor {
        fn extract(&self, path: &str) -> Result<Vec<u8>, ExtractionUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv_timeout(Duration::from_secs(5));
            Ok(path.as_bytes().to_vec())
        }
    }

    struct Harness {
        _dir: TempDir,
        paths: ResourcePaths,
        orchestrator: Orchestrator,
        rendered: Receiver<RenderInstruction>,
        revealed: Arc<Mutex<Vec<String>>>,
    }

    fn harness(settings: Settings) -> Harness {
        harness_with(settings, Arc::new(FixedExtractor))
    }

    fn harness_with(settings: Settings, extractor: Arc<dyn IconExtractor>) -> Harness {
        let dir = TempDir::new().unwrap();
        let paths = ResourcePaths::new(dir.path().join("resources"));
        paths.ensure_resource_files().unwrap();

        let store = paths.rule_store();
        let rules = Arc::new(RuleEngine::new(store.load_all().unwrap()));
        let icons = Arc::new(IconResolver::new(extractor, IconOverrides::empty()));

        let (tx, rendered) = unbounded();
        let manager = Arc::new(NotificationManager::start(settings.board_config(), Box::new(ChannelSurface::new(tx))).unwrap());
        let (events_tx, _events_rx) = bounded(16);
        let poller = ProcessSnapshotPoller::new(Box::new(EmptySource), events_tx);

        let revealed = Arc::new(Mutex::new(Vec::new()));
        let sink = revealed.clone();
        let orchestrator = Orchestrator::new(paths.clone(), settings, rules, store, icons, manager, poller)
            .with_revealer(move |path| {
                sink.lock().push(path.to_string());
                Ok(())
            });

        Harness {
            _dir: dir,
            paths,
            orchestrator,
            rendered,
            revealed,
        }
    }

    fn identity(pid: u32, path: &str) -> ProcessIdentity {
        let name = path.rsplit('\\').next().unwrap_or(path);
        ProcessIdentity::new(ProcessRecord::new(pid, name, Some(path)), false)
    }

    /// Delete first so the reload does not depend on mtime granularity
    fn replace_file(h: &mut Harness, block_list: &str) {
        fs::remove_file(h.paths.block_list()).unwrap();
        h.orchestrator.maintenance();
        fs::write(h.paths.block_list(), block_list).unwrap();
        h.orchestrator.maintenance();
    }

    /// Lets pending icon resolutions land, as the run loop would
    fn settle(h: &mut Harness) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while h.orchestrator.waiting_alerts() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            h.orchestrator.process_icon_updates(Instant::now());
        }
    }

    fn show(h: &mut Harness, identity: ProcessIdentity) -> AlertId {
        let id = h.orchestrator.handle_process_started(identity, Instant::now()).unwrap();
        settle(h);
        id
    }

    fn shown_ids(rx: &Receiver<RenderInstruction>) -> Vec<AlertId> {
        let mut ids = Vec::new();
        while let Ok(instruction) = rx.recv_timeout(Duration::from_millis(300)) {
            if let RenderInstruction::Show { id, .. } = instruction {
                ids.push(id);
            }
        }
        ids
    }

    #[test]
    fn test_rate_limiter_rolling_window() {
        let mut limiter = RateLimiter::per_second(2);
        let t0 = Instant::now();
        assert!(limiter.allow_at(t0));
        assert!(limiter.allow_at(t0 + Duration::from_millis(100)));
        assert!(!limiter.allow_at(t0 + Duration::from_millis(200)));
        assert!(limiter.allow_at(t0 + Duration::from_millis(1000)));
        assert!(!limiter.allow_at(t0 + Duration::from_millis(1050)));
        assert!(limiter.allow_at(t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn test_visible_process_gets_alert_with_icon() {
        let mut h = harness(Settings::default());
        let id = show(&mut h, identity(1, "C:\\Apps\\x.exe"));

        let mut icon_seen = false;
        while let Ok(instruction) = h.rendered.recv_timeout(Duration::from_millis(500)) {
            match instruction {
                RenderInstruction::Show { id: shown, content, .. } if shown == id => {
                    icon_seen |= !content.icon.is_placeholder();
                }
                RenderInstruction::Update { id: updated, change: AlertChange::Icon(icon) } if updated == id => {
                    icon_seen |= !icon.is_placeholder();
                }
                _ => {}
            }
        }
        assert!(icon_seen);
    }

    #[test]
    fn test_blocked_process_is_not_shown() {
        let mut h = harness(Settings::default());
        replace_file(&mut h, "C:\\Apps\\\n");

        assert!(h
            .orchestrator
            .handle_process_started(identity(1, "C:\\Apps\\x.exe"), Instant::now())
            .is_none());
        assert!(h
            .orchestrator
            .handle_process_started(identity(2, "D:\\Other\\y.exe"), Instant::now())
            .is_some());
    }

    #[test]
    fn test_rate_limit_and_disabled_notifications() {
        let mut h = harness(Settings {
            rate_limit_per_second: 2,
            ..Settings::default()
        });
        let now = Instant::now();
        let shown: Vec<_> = (1..=4)
            .filter_map(|pid| h.orchestrator.handle_process_started(identity(pid, "C:\\a.exe"), now))
            .collect();
        assert_eq!(shown.len(), 2);

        h.orchestrator.handle_control(Control::SetNotifications(false));
        let later = now + Duration::from_secs(5);
        assert!(h.orchestrator.handle_process_started(identity(9, "C:\\a.exe"), later).is_none());
        // Persisted
        assert!(!Settings::load_or_default(&h.paths.settings()).notifications_enabled);
    }

    #[test]
    fn test_right_click_toggles_persisted_block_rule() {
        let mut h = harness(Settings::default());
        let id = show(&mut h, identity(1, "C:\\Apps\\x.exe"));

        h.orchestrator.handle_interaction(InteractionEvent::RightClick(id));
        let text = fs::read_to_string(h.paths.block_list()).unwrap();
        assert!(text.contains("c:\\apps\\x.exe"));
        assert!(h.orchestrator.handle_process_started(identity(2, "C:\\Apps\\x.exe"), Instant::now()).is_none());

        assert_eq!(h.orchestrator.manager.inspect(id).map(|a| a.blocked), Some(true));

        // Second right-click removes it again
        h.orchestrator.handle_interaction(InteractionEvent::RightClick(id));
        let text = fs::read_to_string(h.paths.block_list()).unwrap();
        assert!(!text.contains("c:\\apps\\x.exe"));
        assert!(h.orchestrator.handle_process_started(identity(3, "C:\\Apps\\x.exe"), Instant::now()).is_some());
    }

    #[test]
    fn test_allow_toggle_overrides_block_all() {
        let mut h = harness(Settings::default());
        let id = show(&mut h, identity(1, "C:\\Apps\\x.exe"));
        h.orchestrator.handle_interaction(InteractionEvent::AllowToggle(id));

        replace_file(&mut h, "ALL\n");

        assert!(h.orchestrator.handle_process_started(identity(2, "C:\\Apps\\x.exe"), Instant::now()).is_some());
        assert!(h.orchestrator.handle_process_started(identity(3, "C:\\Apps\\y.exe"), Instant::now()).is_none());
    }

    #[test]
    fn test_click_reveals_and_double_click_dismisses() {
        let mut h = harness(Settings::default());
        let id = show(&mut h, identity(1, "C:\\Apps\\x.exe"));

        h.orchestrator.handle_interaction(InteractionEvent::Click(id));
        assert_eq!(*h.revealed.lock(), vec!["C:\\Apps\\x.exe".to_string()]);

        h.orchestrator.handle_interaction(InteractionEvent::DoubleClick(id));
        assert!(h.orchestrator.manager.inspect(id).is_none());
    }

    #[test]
    fn test_settings_change_is_applied() {
        let mut h = harness(Settings::default());
        let changed = Settings {
            max_visible: 1,
            display_ms: 60_000,
            ..Settings::default()
        };
        changed.save(&h.paths.settings()).unwrap();
        h.orchestrator.maintenance();
        assert_eq!(h.orchestrator.settings().max_visible, 1);

        let now = Instant::now();
        let first = h.orchestrator.handle_process_started(identity(1, "C:\\a.exe"), now).unwrap();
        let second = h.orchestrator.handle_process_started(identity(2, "C:\\a.exe"), now).unwrap();
        settle(&mut h);
        let ids = shown_ids(&h.rendered);
        assert!(ids.contains(&first));
        assert!(!ids.contains(&second));
    }

    #[test]
    fn test_slow_icon_never_stalls_alerts() {
        let (release_tx, release_rx) = bounded(4);
        let extractor = Arc::new(GatedExtractor {
            calls: AtomicUsize::new(0),
            release: release_rx,
        });
        let mut h = harness_with(Settings::default(), extractor.clone());

        let started = Instant::now();
        let ids: Vec<AlertId> = (1..=4)
            .filter_map(|pid| {
                h.orchestrator
                    .handle_process_started(identity(pid, "C:\\Apps\\same.exe"), Instant::now())
            })
            .collect();
        assert_eq!(ids.len(), 4);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(h.orchestrator.waiting_alerts(), 4);

        // One resolution for the executable, not one per alert
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        // Wait ran out: shown with the placeholder
        h.orchestrator.process_icon_updates(Instant::now() + Duration::from_secs(1));
        assert_eq!(h.orchestrator.waiting_alerts(), 0);
        let mut shown = Vec::new();
        while let Ok(RenderInstruction::Show { id, content, .. }) = h.rendered.recv_timeout(Duration::from_secs(2)) {
            assert!(content.icon.is_placeholder());
            shown.push(id);
            if shown.len() == ids.len() {
                break;
            }
        }
        assert_eq!(shown, ids);

        // The late icon reaches every alert
        release_tx.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut upgraded = HashSet::new();
        while upgraded.len() < ids.len() && Instant::now() < deadline {
            h.orchestrator.process_icon_updates(Instant::now());
            while let Ok(instruction) = h.rendered.recv_timeout(Duration::from_millis(20)) {
                if let RenderInstruction::Update { id, change: AlertChange::Icon(icon) } = instruction {
                    assert!(!icon.is_placeholder());
                    upgraded.insert(id);
                }
            }
        }
        assert_eq!(upgraded.len(), ids.len());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_rule_write_leaves_rules_unchanged() {
        let mut h = harness(Settings::default());
        let id = show(&mut h, identity(1, "C:\\Apps\\x.exe"));

        // A directory in place of the block list makes every write fail
        fs::remove_file(h.paths.block_list()).unwrap();
        fs::create_dir(h.paths.block_list()).unwrap();
        h.orchestrator.handle_interaction(InteractionEvent::RightClick(id));

        assert!(!h.orchestrator.rules.contains(RuleKind::ExactPath, "C:\\Apps\\x.exe", ListKind::Block));
        assert_eq!(h.orchestrator.manager.inspect(id).map(|a| a.blocked), Some(false));
        assert!(h.orchestrator.handle_process_started(identity(2, "C:\\Apps\\x.exe"), Instant::now()).is_some());
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let h = harness(Settings::default());
        let (_process_tx, process_rx) = bounded::<ProcessIdentity>(1);
        let (control_tx, control_rx) = bounded(4);
        control_tx.send(Control::Shutdown).unwrap();
        h.orchestrator.run(process_rx, control_rx).unwrap();
    }
}
