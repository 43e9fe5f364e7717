//! Logging

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const APP_LOG: &str = "app.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the console logger
pub fn init_console_logger() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(env_filter())
        .try_init()
        .context("installing console logger")?;

    Ok(())
}

/// Initializes the file logger (daily `app.log` under `log_dir`)
pub fn init_file_logger(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, APP_LOG);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Guard must stay alive for the whole run
    Box::leak(Box::new(guard));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_target(false).with_ansi(false))
        .with(env_filter())
        .try_init()
        .context("installing file logger")?;

    cleanup_old_logs(log_dir, 2, APP_LOG);
    Ok(())
}

/// Deletes old log files with the given prefix, keeps only the newest N
pub fn cleanup_old_logs(log_dir: &Path, keep_count: usize, prefix: &str) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(prefix))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| {
        let time_a = a.metadata().and_then(|m| m.modified()).ok();
        let time_b = b.metadata().and_then(|m| m.modified()).ok();
        time_b.cmp(&time_a)
    });

    let mut deleted = 0;
    for old_file in log_files.iter().skip(keep_count) {
        match fs::remove_file(old_file.path()) {
            Ok(()) => {
                deleted += 1;
                info!("Old log file deleted: {}", old_file.path().display());
            }
            Err(e) => error!("Could not delete old log file: {}", e),
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for (i, day) in ["2026-01-01", "2026-01-02", "2026-01-03", "2026-01-04"].iter().enumerate() {
            let path = dir.path().join(format!("app.log.{}", day));
            fs::write(&path, "x").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(60 * i as u64)).unwrap();
        }
        fs::write(dir.path().join("other.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 2, "app.log"), 2);
        assert!(dir.path().join("app.log.2026-01-04").exists());
        assert!(dir.path().join("app.log.2026-01-03").exists());
        assert!(!dir.path().join("app.log.2026-01-01").exists());
        assert!(dir.path().join("other.txt").exists());
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(cleanup_old_logs(&dir.path().join("nope"), 2, "app.log"), 0);
    }
}
