//! Block/Allow Rules
//!
//! Rules are immutable values. A `RuleSet` is rebuilt and swapped as a whole,
//! never edited in place while someone may be reading it.

pub mod engine;
pub mod store;

pub use engine::{Decision, RuleEngine, Tier};
pub use store::RuleStore;

use crate::error::{InvalidRuleMutation, RuleParseError};
use std::collections::HashSet;
use std::fmt;

/// Token that marks "everything" in the block list
pub const ALL_MARKER: &str = "ALL";

/// Canonical separator used for every normalized path
pub const SEPARATOR: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    ExactPath,
    Name,
    Directory,
    AllMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Allow,
    Block,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Allow => write!(f, "allow"),
            ListKind::Block => write!(f, "block"),
        }
    }
}

/// A single matching directive. `pattern` is always normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub kind: RuleKind,
    pub pattern: String,
    pub list: ListKind,
}

impl Rule {
    /// Validates and normalizes a pattern for the given kind
    pub fn new(kind: RuleKind, pattern: &str, list: ListKind) -> Result<Self, InvalidRuleMutation> {
        let trimmed = pattern.trim();
        if kind == RuleKind::AllMarker {
            return Ok(Self { kind, pattern: ALL_MARKER.to_string(), list });
        }
        if trimmed.is_empty() {
            return Err(InvalidRuleMutation::Empty);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(InvalidRuleMutation::ControlCharacters(trimmed.to_string()));
        }

        let pattern = match kind {
            RuleKind::Name => {
                if trimmed.contains(['\\', '/']) {
                    return Err(InvalidRuleMutation::NameWithSeparator(trimmed.to_string()));
                }
                trimmed.to_lowercase()
            }
            RuleKind::ExactPath => {
                let path = normalize_path(trimmed);
                let path = path.trim_end_matches(SEPARATOR).to_string();
                if !is_absolute(&path) {
                    return Err(InvalidRuleMutation::RelativePath(trimmed.to_string()));
                }
                path
            }
            RuleKind::Directory => {
                let mut dir = normalize_path(trimmed);
                if !dir.ends_with(SEPARATOR) {
                    dir.push(SEPARATOR);
                }
                if !is_absolute(&dir) {
                    return Err(InvalidRuleMutation::RelativePath(trimmed.to_string()));
                }
                dir
            }
            RuleKind::AllMarker => ALL_MARKER.to_string(),
        };

        Ok(Self { kind, pattern, list })
    }

    /// Classifies one persisted line (already stripped of comments and blanks)
    pub fn parse_line(line: &str, list: ListKind) -> Result<Self, InvalidRuleMutation> {
        let entry = line.trim();
        let kind = if entry == ALL_MARKER {
            RuleKind::AllMarker
        } else if entry.ends_with(['\\', '/']) {
            RuleKind::Directory
        } else if entry.contains(['\\', '/']) {
            RuleKind::ExactPath
        } else {
            RuleKind::Name
        };
        Rule::new(kind, entry, list)
    }

    /// Text written to the persistence store for this rule
    pub fn to_line(&self) -> String {
        self.pattern.clone()
    }
}

/// Lowercases and converts every separator to the canonical one
pub fn normalize_path(path: &str) -> String {
    path.trim().to_lowercase().replace('/', "\\")
}

/// `C:\...`, `\\server\...` or `\...` (a normalized Unix root)
fn is_absolute(normalized: &str) -> bool {
    let bytes = normalized.as_bytes();
    let drive = bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\';
    drive || normalized.starts_with(SEPARATOR)
}

/// Rules of one list, partitioned by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleList {
    paths: HashSet<String>,
    names: HashSet<String>,
    /// Sorted longest first, no duplicates
    directories: Vec<String>,
    all: bool,
}

impl RuleList {
    pub fn insert(&mut self, kind: RuleKind, pattern: &str) -> bool {
        match kind {
            RuleKind::ExactPath => self.paths.insert(pattern.to_string()),
            RuleKind::Name => self.names.insert(pattern.to_string()),
            RuleKind::Directory => {
                if self.directories.iter().any(|d| d == pattern) {
                    return false;
                }
                self.directories.push(pattern.to_string());
                self.directories
                    .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
                true
            }
            RuleKind::AllMarker => !std::mem::replace(&mut self.all, true),
        }
    }

    pub fn remove(&mut self, kind: RuleKind, pattern: &str) -> bool {
        match kind {
            RuleKind::ExactPath => self.paths.remove(pattern),
            RuleKind::Name => self.names.remove(pattern),
            RuleKind::Directory => {
                let before = self.directories.len();
                self.directories.retain(|d| d != pattern);
                before != self.directories.len()
            }
            RuleKind::AllMarker => std::mem::replace(&mut self.all, false),
        }
    }

    pub fn contains(&self, kind: RuleKind, pattern: &str) -> bool {
        match kind {
            RuleKind::ExactPath => self.paths.contains(pattern),
            RuleKind::Name => self.names.contains(pattern),
            RuleKind::Directory => self.directories.iter().any(|d| d == pattern),
            RuleKind::AllMarker => self.all,
        }
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn has_all(&self) -> bool {
        self.all
    }

    /// Deepest directory that is a prefix of `path`
    pub fn longest_directory_match(&self, path: &str) -> Option<&str> {
        // Sorted longest first, so the first hit wins
        self.directories
            .iter()
            .find(|dir| path.starts_with(dir.as_str()) && path.len() > dir.len())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len() + self.names.len() + self.directories.len() + usize::from(self.all)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allow and Block lists plus the blocking switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub allow: RuleList,
    pub block: RuleList,
    pub blocking_enabled: bool,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            allow: RuleList::default(),
            block: RuleList::default(),
            blocking_enabled: true,
        }
    }
}

impl RuleSet {
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut set = Self::default();
        for rule in rules {
            set.list_mut(rule.list).insert(rule.kind, &rule.pattern);
        }
        set
    }

    pub fn list(&self, list: ListKind) -> &RuleList {
        match list {
            ListKind::Allow => &self.allow,
            ListKind::Block => &self.block,
        }
    }

    pub fn list_mut(&mut self, list: ListKind) -> &mut RuleList {
        match list {
            ListKind::Allow => &mut self.allow,
            ListKind::Block => &mut self.block,
        }
    }
}

/// Parses a whole persisted list. Bad lines are returned separately and skipped.
pub fn parse_rules(text: &str, list: ListKind) -> (Vec<Rule>, Vec<RuleParseError>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let entry = raw.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        match Rule::parse_line(entry, list) {
            Ok(rule) => rules.push(rule),
            Err(e) => errors.push(RuleParseError {
                line: index + 1,
                text: entry.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    (rules, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_pattern_always_ends_with_separator() {
        let rule = Rule::new(RuleKind::Directory, "C:/Program Files", ListKind::Block).unwrap();
        assert_eq!(rule.pattern, "c:\\program files\\");
    }

    #[test]
    fn test_exact_path_is_lowercased_and_unified() {
        let rule = Rule::new(RuleKind::ExactPath, "C:/Apps/X.exe", ListKind::Allow).unwrap();
        assert_eq!(rule.pattern, "c:\\apps\\x.exe");

        let unix = Rule::new(RuleKind::ExactPath, "/usr/bin/Top", ListKind::Allow).unwrap();
        assert_eq!(unix.pattern, "\\usr\\bin\\top");
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        assert!(matches!(
            Rule::new(RuleKind::Name, "   ", ListKind::Block),
            Err(InvalidRuleMutation::Empty)
        ));
        assert!(matches!(
            Rule::new(RuleKind::ExactPath, "apps\\x.exe", ListKind::Block),
            Err(InvalidRuleMutation::RelativePath(_))
        ));
        assert!(matches!(
            Rule::new(RuleKind::Name, "a\\b.exe", ListKind::Block),
            Err(InvalidRuleMutation::NameWithSeparator(_))
        ));
        assert!(matches!(
            Rule::new(RuleKind::Name, "bad\u{7}.exe", ListKind::Block),
            Err(InvalidRuleMutation::ControlCharacters(_))
        ));
    }

    #[test]
    fn test_parse_line_classification() {
        let cases = [
            ("ALL", RuleKind::AllMarker),
            ("C:\\Windows\\", RuleKind::Directory),
            ("/opt/tools/", RuleKind::Directory),
            ("C:\\Windows\\notepad.exe", RuleKind::ExactPath),
            ("notepad.exe", RuleKind::Name),
        ];
        for (line, kind) in cases {
            assert_eq!(Rule::parse_line(line, ListKind::Block).unwrap().kind, kind, "line {}", line);
        }
    }

    #[test]
    fn test_parse_rules_skips_comments_and_bad_lines() {
        let text = "# header\n\nnotepad.exe\nrelative\\path.exe\nC:\\Tools\\\nALL\n";
        let (rules, errors) = parse_rules(text, ListKind::Block);

        assert_eq!(rules.len(), 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 4);
    }

    #[test]
    fn test_rule_list_set_semantics() {
        let mut list = RuleList::default();
        assert!(list.insert(RuleKind::Directory, "c:\\apps\\"));
        assert!(!list.insert(RuleKind::Directory, "c:\\apps\\"));
        assert!(list.insert(RuleKind::Directory, "c:\\apps\\sub\\"));
        assert_eq!(list.len(), 2);

        assert_eq!(list.longest_directory_match("c:\\apps\\sub\\y.exe"), Some("c:\\apps\\sub\\"));
        assert_eq!(list.longest_directory_match("c:\\apps\\y.exe"), Some("c:\\apps\\"));
        assert_eq!(list.longest_directory_match("c:\\other\\y.exe"), None);

        assert!(list.remove(RuleKind::Directory, "c:\\apps\\"));
        assert!(!list.contains(RuleKind::Directory, "c:\\apps\\"));
    }

    #[test]
    fn test_directory_does_not_match_itself() {
        let mut list = RuleList::default();
        list.insert(RuleKind::Directory, "c:\\apps\\");
        assert_eq!(list.longest_directory_match("c:\\apps\\"), None);
    }
}
