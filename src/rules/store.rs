//! Rule Persistence
//!
//! One rule per line in `allow_list.txt` / `block_list.txt`. Every write goes
//! to a temp file first and is renamed over the original.

use super::{parse_rules, ListKind, Rule, RuleSet};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const BLOCK_HEADER: &str = "\
# Add/remove entries automatically by right-clicking notifications
# Add full path to block specific processes
# Example: C:\\Program Files\\MyApp\\MyApp.exe
# Add folder path to block all processes in a directory
# Example: C:\\Program Files\\
# Add process name for blanket blocking
# Example: MyApp.exe
# Add ALL on its own line to block everything not explicitly allowed
# --------------------------------------------------------------------
";

const ALLOW_HEADER: &str = "\
# Add entries to allow specific processes (overrides block list)
# Add full path to allow specific processes
# Example: C:\\Program Files\\MyApp\\MyApp.exe
# Add folder path to allow all processes in a directory
# Example: C:\\Program Files\\
# Add process name for blanket allowing
# Example: MyApp.exe
# --------------------------------------------------------------------
";

/// Line-oriented store for both rule lists
pub struct RuleStore {
    allow_file: PathBuf,
    block_file: PathBuf,
    /// Last seen modification times (allow, block)
    seen: Mutex<(Option<SystemTime>, Option<SystemTime>)>,
    /// Serializes read-modify-write cycles on the files
    write_lock: Mutex<()>,
}

impl RuleStore {
    pub fn new(allow_file: impl Into<PathBuf>, block_file: impl Into<PathBuf>) -> Self {
        Self {
            allow_file: allow_file.into(),
            block_file: block_file.into(),
            seen: Mutex::new((None, None)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, list: ListKind) -> &Path {
        match list {
            ListKind::Allow => &self.allow_file,
            ListKind::Block => &self.block_file,
        }
    }

    /// Creates missing list files with their commented header
    pub fn ensure_files(&self) -> Result<()> {
        for list in [ListKind::Allow, ListKind::Block] {
            let path = self.path(list);
            if path.exists() {
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let header = match list {
                ListKind::Allow => ALLOW_HEADER,
                ListKind::Block => BLOCK_HEADER,
            };
            fs::write(path, header).with_context(|| format!("creating {}", path.display()))?;
            info!("Created {} list: {}", list, path.display());
        }
        Ok(())
    }

    /// Loads one list. A missing file is an empty list; bad lines are skipped.
    pub fn load(&self, list: ListKind) -> Result<Vec<Rule>> {
        let path = self.path(list);
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} list not found: {}", list, path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let (rules, errors) = parse_rules(&text, list);
        for error in &errors {
            warn!("{}: {}", path.display(), error);
        }
        debug!("Loaded {} rules from {} list", rules.len(), list);
        Ok(rules)
    }

    /// Loads both lists into a fresh rule set and records their mtimes
    pub fn load_all(&self) -> Result<RuleSet> {
        let times = self.current_times();
        let mut rules = self.load(ListKind::Allow)?;
        rules.extend(self.load(ListKind::Block)?);
        *self.seen.lock() = times;
        Ok(RuleSet::from_rules(rules))
    }

    /// True if either file changed since the last `load_all`
    pub fn has_changed(&self) -> bool {
        self.current_times() != *self.seen.lock()
    }

    /// Adds a rule line unless an equal rule is already present
    pub fn append(&self, rule: &Rule) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let path = self.path(rule.list);
        let mut text = read_or_empty(path)?;

        let present = text
            .lines()
            .any(|line| matches_rule(line, rule));
        if present {
            return Ok(false);
        }

        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&rule.to_line());
        text.push('\n');

        write_atomic(path, &text)?;
        self.mark_written(rule.list);
        info!("Appended '{}' to {}", rule.to_line(), path.display());
        Ok(true)
    }

    /// Removes every line equal to the rule; comments and other lines stay
    pub fn remove(&self, rule: &Rule) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let path = self.path(rule.list);
        let text = read_or_empty(path)?;

        let mut removed = false;
        let mut kept = String::with_capacity(text.len());
        for line in text.lines() {
            if matches_rule(line, rule) {
                removed = true;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }

        if removed {
            write_atomic(path, &kept)?;
            self.mark_written(rule.list);
            info!("Removed '{}' from {}", rule.to_line(), path.display());
        }
        Ok(removed)
    }

    fn current_times(&self) -> (Option<SystemTime>, Option<SystemTime>) {
        (modified(&self.allow_file), modified(&self.block_file))
    }

    /// Own writes are already applied in memory, so they don't count as a change
    fn mark_written(&self, list: ListKind) {
        let time = modified(self.path(list));
        let mut seen = self.seen.lock();
        match list {
            ListKind::Allow => seen.0 = time,
            ListKind::Block => seen.1 = time,
        }
    }
}

fn matches_rule(line: &str, rule: &Rule) -> bool {
    let entry = line.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return false;
    }
    match Rule::parse_line(entry, rule.list) {
        Ok(parsed) => parsed.kind == rule.kind && parsed.pattern == rule.pattern,
        Err(_) => false,
    }
}

fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Write to `<file>.tmp`, then rename over the target
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub(crate) fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
