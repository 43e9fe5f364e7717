//! Error Types
//!
//! None of these are fatal: each one degrades to a safe default at the call site.

use thiserror::Error;

/// The whole process table could not be read. The poll cycle is skipped.
#[derive(Debug, Error)]
#[error("process enumeration failed: {0}")]
pub struct EnumerationError(pub String);

/// A single attribute (path, elevation) of one process could not be read.
#[derive(Debug, Error)]
#[error("could not resolve {attribute} for PID {pid}: {reason}")]
pub struct AttributeResolutionError {
    pub pid: u32,
    pub attribute: &'static str,
    pub reason: String,
}

/// Icon extraction collaborator has nothing for this executable.
#[derive(Debug, Error)]
#[error("icon extraction unavailable for {path}: {reason}")]
pub struct ExtractionUnavailable {
    pub path: String,
    pub reason: String,
}

/// A persisted rule line that could not be understood.
#[derive(Debug, Error)]
#[error("line {line}: cannot parse rule '{text}': {reason}")]
pub struct RuleParseError {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

/// A rule mutation was rejected; the rule set is unchanged.
#[derive(Debug, Error)]
pub enum InvalidRuleMutation {
    #[error("empty rule pattern")]
    Empty,
    #[error("pattern '{0}' contains control characters")]
    ControlCharacters(String),
    #[error("path rule '{0}' is not absolute")]
    RelativePath(String),
    #[error("name rule '{0}' must not contain a path separator")]
    NameWithSeparator(String),
}

/// Settings file could not be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
