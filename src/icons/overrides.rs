//! Custom Icon Table
//!
//! `custom_icons.txt` maps a path or process name to an icon file name in
//! the `custom_icons/` folder:
//!
//! ```text
//! "C:\Program Files\MyApp\example.exe", "example_icon"
//! "example.exe", "example_icon"
//! ```

use super::{Icon, IconSource};
use crate::process::ProcessIdentity;
use crate::rules::{normalize_path, SEPARATOR};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions tried in order for every icon name
pub const ICON_EXTENSIONS: [&str; 5] = ["ico", "png", "jpg", "jpeg", "bmp"];

pub const HEADER: &str = "\
# Format: \"Path\", \"Icon name\"
# Format: \"Process name\", \"Icon name\"
# Example: \"C:\\Program Files\\MyApp\\example.exe\", \"example_icon\"
# Example: \"example.exe\", \"example_icon\"
# --------------------------------------------------------------------
";

/// Loaded override table with icon bytes read up front
#[derive(Debug, Default)]
pub struct IconOverrides {
    by_path: HashMap<String, Icon>,
    by_name: HashMap<String, Icon>,
}

impl IconOverrides {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the table; a missing table is empty, missing icon files are skipped
    pub fn load(table: &Path, icon_dir: &Path) -> Result<Self> {
        let text = match fs::read_to_string(table) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", table.display())),
        };

        let mut overrides = Self::empty();
        for (line, target, icon_name) in parse_table(&text) {
            let Some(file) = find_icon_file(icon_dir, &icon_name) else {
                warn!("custom_icons.txt line {}: no icon file for '{}'", line, icon_name);
                continue;
            };
            match fs::read(&file) {
                Ok(bytes) => overrides.insert(&target, Icon::new(bytes, IconSource::CustomOverride)),
                Err(e) => warn!("Could not read icon {}: {}", file.display(), e),
            }
        }

        debug!("Loaded {} custom icons", overrides.len());
        Ok(overrides)
    }

    pub fn insert(&mut self, target: &str, icon: Icon) {
        let key = override_key(target);
        if key.contains(SEPARATOR) {
            self.by_path.insert(key, icon);
        } else {
            self.by_name.insert(key, icon);
        }
    }

    /// Exact path first, then bare name
    pub fn lookup(&self, identity: &ProcessIdentity) -> Option<&Icon> {
        identity
            .full_path
            .as_deref()
            .and_then(|path| self.by_path.get(&override_key(path)))
            .or_else(|| self.by_name.get(&identity.name.to_lowercase()))
    }

    pub fn len(&self) -> usize {
        self.by_path.len() + self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn override_key(target: &str) -> String {
    normalize_path(target).trim_end_matches(SEPARATOR).to_string()
}

/// `<dir>/<name>.<ext>` for the first extension that exists
fn find_icon_file(icon_dir: &Path, icon_name: &str) -> Option<PathBuf> {
    ICON_EXTENSIONS
        .iter()
        .map(|ext| icon_dir.join(format!("{}.{}", icon_name, ext)))
        .find(|candidate| candidate.is_file())
}

/// Returns (line number, path or name, icon name) for every valid row
pub fn parse_table(text: &str) -> Vec<(usize, String, String)> {
    text.lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match split_pair(line) {
                Some((target, icon)) if !target.is_empty() && !icon.is_empty() => {
                    Some((index + 1, target, icon))
                }
                _ => {
                    warn!("custom_icons.txt line {}: cannot parse '{}'", index + 1, line);
                    None
                }
            }
        })
        .collect()
}

/// Splits `"a", "b"` (quotes optional) at the first comma outside quotes
fn split_pair(line: &str) -> Option<(String, String)> {
    let mut in_quotes = false;
    let split_at = line.char_indices().find_map(|(i, c)| match c {
        '"' => {
            in_quotes = !in_quotes;
            None
        }
        ',' if !in_quotes => Some(i),
        _ => None,
    })?;

    let unquote = |s: &str| s.trim().trim_matches('"').trim().to_string();
    Some((unquote(&line[..split_at]), unquote(&line[split_at + 1..])))
}
