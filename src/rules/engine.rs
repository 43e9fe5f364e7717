//! Rule Engine
//!
//! Decides whether a newly observed process deserves an alert.
//!
//! Precedence is an ordered list of stages (exact path, name, directory,
//! ALL marker). Each stage looks at the Allow list first, then the Block
//! list, and the first stage that matches decides. No match anywhere means
//! the process is shown.

use super::{normalize_path, ListKind, Rule, RuleKind, RuleSet};
use crate::error::InvalidRuleMutation;
use crate::process::ProcessIdentity;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Visible,
    Hidden,
}

/// Which precedence tier produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    AllowPath,
    BlockPath,
    AllowName,
    BlockName,
    AllowDirectory,
    BlockDirectory,
    BlockAll,
    NoMatch,
    BlockingDisabled,
}

impl Tier {
    fn decision(self) -> Decision {
        match self {
            Tier::BlockPath | Tier::BlockName | Tier::BlockDirectory | Tier::BlockAll => Decision::Hidden,
            _ => Decision::Visible,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    ExactPath,
    Name,
    Directory,
    AllMarker,
}

const STAGES: [Stage; 4] = [Stage::ExactPath, Stage::Name, Stage::Directory, Stage::AllMarker];

/// Identity reduced to the keys the stages compare against
struct MatchKeys {
    name: String,
    path: Option<String>,
}

impl MatchKeys {
    fn new(identity: &ProcessIdentity) -> Self {
        Self {
            name: identity.name.trim().to_lowercase(),
            path: identity.full_path.as_deref().map(normalize_path),
        }
    }
}

impl Stage {
    /// Returns the list that matched, Allow checked before Block
    fn evaluate(self, keys: &MatchKeys, rules: &RuleSet) -> Option<ListKind> {
        [ListKind::Allow, ListKind::Block].into_iter().find(|&list| {
            let list_rules = rules.list(list);
            match self {
                Stage::ExactPath => keys.path.as_deref().is_some_and(|p| list_rules.has_path(p)),
                Stage::Name => list_rules.has_name(&keys.name),
                Stage::Directory => keys
                    .path
                    .as_deref()
                    .is_some_and(|p| list_rules.longest_directory_match(p).is_some()),
                // Only meaningful in the Block list
                Stage::AllMarker => list == ListKind::Block && list_rules.has_all(),
            }
        })
    }

    fn tier(self, list: ListKind) -> Tier {
        match (self, list) {
            (Stage::ExactPath, ListKind::Allow) => Tier::AllowPath,
            (Stage::ExactPath, ListKind::Block) => Tier::BlockPath,
            (Stage::Name, ListKind::Allow) => Tier::AllowName,
            (Stage::Name, ListKind::Block) => Tier::BlockName,
            (Stage::Directory, ListKind::Allow) => Tier::AllowDirectory,
            (Stage::Directory, ListKind::Block) => Tier::BlockDirectory,
            (Stage::AllMarker, _) => Tier::BlockAll,
        }
    }
}

/// Pure evaluation of one identity against one rule set
pub fn evaluate(rules: &RuleSet, identity: &ProcessIdentity) -> Tier {
    if !rules.blocking_enabled {
        return Tier::BlockingDisabled;
    }
    let keys = MatchKeys::new(identity);
    STAGES
        .iter()
        .find_map(|stage| stage.evaluate(&keys, rules).map(|list| stage.tier(list)))
        .unwrap_or(Tier::NoMatch)
}

/// Holds the current rule set and swaps it atomically on mutation
pub struct RuleEngine {
    current: RwLock<Arc<RuleSet>>,
    /// Serializes writers so two mutations never build from the same base
    writer: Mutex<()>,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
            writer: Mutex::new(()),
        }
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    pub fn decide(&self, identity: &ProcessIdentity) -> Decision {
        self.decide_traced(identity).0
    }

    /// Decision plus the tier that produced it
    pub fn decide_traced(&self, identity: &ProcessIdentity) -> (Decision, Tier) {
        let rules = self.snapshot();
        let tier = evaluate(&rules, identity);
        (tier.decision(), tier)
    }

    pub fn add_rule(&self, kind: RuleKind, pattern: &str, list: ListKind) -> Result<bool, InvalidRuleMutation> {
        let rule = Rule::new(kind, pattern, list)?;
        let changed = self.mutate(|set| set.list_mut(list).insert(rule.kind, &rule.pattern));
        if changed {
            info!("Rule added to {} list: {:?} {}", list, kind, rule.pattern);
        }
        Ok(changed)
    }

    pub fn remove_rule(&self, kind: RuleKind, pattern: &str, list: ListKind) -> Result<bool, InvalidRuleMutation> {
        let rule = Rule::new(kind, pattern, list)?;
        let changed = self.mutate(|set| set.list_mut(list).remove(rule.kind, &rule.pattern));
        if changed {
            info!("Rule removed from {} list: {:?} {}", list, kind, rule.pattern);
        }
        Ok(changed)
    }

    pub fn contains(&self, kind: RuleKind, pattern: &str, list: ListKind) -> bool {
        match Rule::new(kind, pattern, list) {
            Ok(rule) => self.snapshot().list(list).contains(rule.kind, &rule.pattern),
            Err(_) => false,
        }
    }

    /// Replaces both lists at once; keeps the blocking switch
    pub fn reload(&self, mut rules: RuleSet) {
        let _guard = self.writer.lock();
        rules.blocking_enabled = self.current.read().blocking_enabled;
        debug!(
            allow = rules.allow.len(),
            block = rules.block.len(),
            "Rule set reloaded"
        );
        *self.current.write() = Arc::new(rules);
    }

    pub fn set_blocking_enabled(&self, enabled: bool) {
        self.mutate(|set| {
            let changed = set.blocking_enabled != enabled;
            set.blocking_enabled = enabled;
            changed
        });
        info!("Blocking {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn blocking_enabled(&self) -> bool {
        self.current.read().blocking_enabled
    }

    /// Copy-on-write: build a new set from the current one, then swap
    fn mutate(&self, apply: impl FnOnce(&mut RuleSet) -> bool) -> bool {
        let _guard = self.writer.lock();
        let mut next = (**self.current.read()).clone();
        let changed = apply(&mut next);
        if changed {
            *self.current.write() = Arc::new(next);
        }
        changed
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleSet::default())
    }
}
