//! Process Information
//!
//! Enumerates live processes through `sysinfo` and resolves the attributes
//! a rule decision needs: name, full path and elevation.

use crate::error::{AttributeResolutionError, EnumerationError};
use std::path::Path;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// One observed process instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: u32,
    /// Lowercased executable file name
    pub name: String,
    /// Full executable path, absent when the process is unreadable
    pub full_path: Option<String>,
    pub is_elevated: bool,
}

impl ProcessIdentity {
    pub fn new(record: ProcessRecord, is_elevated: bool) -> Self {
        Self {
            pid: record.pid,
            name: record.name,
            full_path: record.path,
            is_elevated,
        }
    }

    /// Path if known, otherwise the name
    pub fn display_target(&self) -> &str {
        self.full_path.as_deref().unwrap_or(&self.name)
    }
}

/// Raw row from the process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub path: Option<String>,
}

impl ProcessRecord {
    pub fn new(pid: u32, name: &str, path: Option<&str>) -> Self {
        Self {
            pid,
            name: name.trim().to_lowercase(),
            path: path.filter(|p| !p.trim().is_empty()).map(str::to_string),
        }
    }
}

/// Process enumeration service
pub trait ProcessSource: Send {
    /// Current live process table
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, EnumerationError>;

    /// Best-effort elevation lookup for one pid
    fn resolve_elevation(&self, pid: u32) -> Result<bool, AttributeResolutionError>;
}

/// `sysinfo` backed process table
pub struct SystemProcessSource {
    system: System,
}

impl SystemProcessSource {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SystemProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SystemProcessSource {
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, EnumerationError> {
        // Only what a decision needs; exe and user never change for a pid
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::new()
                .with_exe(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );

        let processes = self.system.processes();
        // A live host always has processes; an empty table means the read failed
        if processes.is_empty() {
            return Err(EnumerationError("process table is empty".to_string()));
        }

        let mut records: Vec<ProcessRecord> = processes
            .iter()
            // Linux tasks (threads) show up in the table too
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let path = process.exe().map(|p| p.to_string_lossy().to_string());
                // Prefer the file name of the image, the short name can be truncated
                let name = path
                    .as_deref()
                    .and_then(|p| Path::new(p).file_name())
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| Path::new(process.name()).to_string_lossy().to_string());
                ProcessRecord::new(pid.as_u32(), &name, path.as_deref())
            })
            .collect();

        // Stable order for the diff
        records.sort_by_key(|r| r.pid);
        debug!("Enumerated {} processes", records.len());
        Ok(records)
    }

    #[cfg(windows)]
    fn resolve_elevation(&self, pid: u32) -> Result<bool, AttributeResolutionError> {
        token_elevation(pid)
    }

    #[cfg(not(windows))]
    fn resolve_elevation(&self, pid: u32) -> Result<bool, AttributeResolutionError> {
        let process = self
            .system
            .process(sysinfo::Pid::from_u32(pid))
            .ok_or_else(|| AttributeResolutionError {
                pid,
                attribute: "elevation",
                reason: "process exited".to_string(),
            })?;

        // Root effective uid counts as elevated
        process
            .effective_user_id()
            .or_else(|| process.user_id())
            .map(|uid| **uid == 0)
            .ok_or_else(|| AttributeResolutionError {
                pid,
                attribute: "elevation",
                reason: "user id unavailable".to_string(),
            })
    }
}

/// Reads `TokenElevation` from the process token
#[cfg(windows)]
fn token_elevation(pid: u32) -> Result<bool, AttributeResolutionError> {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{OpenProcess, OpenProcessToken, PROCESS_QUERY_LIMITED_INFORMATION};

    let failure = |reason: String| AttributeResolutionError {
        pid,
        attribute: "elevation",
        reason,
    };

    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid)
            .map_err(|e| failure(e.to_string()))?;

        let mut token = HANDLE::default();
        let opened = OpenProcessToken(process, TOKEN_QUERY, &mut token);
        let _ = CloseHandle(process);
        opened.map_err(|e| failure(e.to_string()))?;

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        let result = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        let _ = CloseHandle(token);
        result.map_err(|e| failure(e.to_string()))?;

        Ok(elevation.TokenIsElevated != 0)
    }
}
