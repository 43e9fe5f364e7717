//! Configuration
//!
//! `settings.json` plus the layout of the resources folder.

use crate::error::ConfigError;
use crate::icons::overrides::HEADER as CUSTOM_ICONS_HEADER;
use crate::notifications::{BoardConfig, StackLayout, ViewMode};
use crate::rules::store::{modified, write_atomic};
use crate::rules::RuleStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// User settings. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub poll_interval_ms: u64,
    pub display_ms: u64,
    pub fade_ms: u64,
    pub max_visible: usize,
    pub margin_right: i32,
    pub margin_bottom: i32,
    pub rate_limit_per_second: u32,
    pub icon_wait_ms: u64,
    pub notifications_enabled: bool,
    pub blocking_enabled: bool,
    pub expanded_view: bool,
    pub reload_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            display_ms: 5000,
            fade_ms: 2000,
            max_visible: 20,
            margin_right: 4,
            margin_bottom: 50,
            rate_limit_per_second: 10,
            icon_wait_ms: 250,
            notifications_enabled: true,
            blocking_enabled: true,
            expanded_view: false,
            reload_interval_ms: 5000,
        }
    }
}

impl Settings {
    /// Parses and clamps. Fails on unreadable or malformed files.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        Ok(settings.clamped())
    }

    /// Like `from_file`, but any problem yields defaults
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{} ({}), using defaults", e, path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing settings")?;
        write_atomic(path, &json)?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn clamped(mut self) -> Self {
        self.poll_interval_ms = self.poll_interval_ms.max(50);
        self.max_visible = self.max_visible.max(1);
        self.rate_limit_per_second = self.rate_limit_per_second.max(1);
        self.reload_interval_ms = self.reload_interval_ms.max(250);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn icon_wait(&self) -> Duration {
        Duration::from_millis(self.icon_wait_ms)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }

    pub fn board_config(&self) -> BoardConfig {
        BoardConfig {
            display: Duration::from_millis(self.display_ms),
            fade: Duration::from_millis(self.fade_ms),
            max_visible: self.max_visible,
        }
    }

    pub fn layout(&self) -> StackLayout {
        StackLayout {
            margin_right: self.margin_right,
            margin_bottom: self.margin_bottom,
            ..StackLayout::default()
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        if self.expanded_view {
            ViewMode::Expanded
        } else {
            ViewMode::Collapsed
        }
    }
}

/// Every file under the resources folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePaths {
    pub root: PathBuf,
}

impl ResourcePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `resources/` next to the executable, or under the working directory
    pub fn default_root() -> PathBuf {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                return exe_dir.join("resources");
            }
        }
        PathBuf::from(".").join("resources")
    }

    pub fn block_list(&self) -> PathBuf {
        self.root.join("block_list.txt")
    }

    pub fn allow_list(&self) -> PathBuf {
        self.root.join("allow_list.txt")
    }

    pub fn custom_icons_table(&self) -> PathBuf {
        self.root.join("custom_icons.txt")
    }

    pub fn custom_icons_dir(&self) -> PathBuf {
        self.root.join("custom_icons")
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn rule_store(&self) -> RuleStore {
        RuleStore::new(self.allow_list(), self.block_list())
    }

    /// Creates the folder layout and the commented text files if missing
    pub fn ensure_resource_files(&self) -> Result<()> {
        fs::create_dir_all(&self.root).with_context(|| format!("creating {}", self.root.display()))?;
        fs::create_dir_all(self.custom_icons_dir())?;

        self.rule_store().ensure_files()?;

        let table = self.custom_icons_table();
        if !table.exists() {
            fs::write(&table, CUSTOM_ICONS_HEADER).with_context(|| format!("creating {}", table.display()))?;
        }
        Ok(())
    }
}

/// Remembers a file's mtime and reports when it moves
#[derive(Debug, Clone)]
pub struct FileWatch {
    path: PathBuf,
    seen: Option<SystemTime>,
}

impl FileWatch {
    pub fn new(path: PathBuf) -> Self {
        let seen = modified(&path);
        Self { path, seen }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once per change
    pub fn poll_changed(&mut self) -> bool {
        let current = modified(&self.path);
        if current != self.seen {
            self.seen = current;
            true
        } else {
            false
        }
    }

    /// Accepts the current state, e.g. after our own write
    pub fn mark_seen(&mut self) {
        self.seen = modified(&self.path);
    }
}
