//! Logging Infrastructure
//!
//! - Console: pretty in development, JSON in production
//! - File: `<logs>/app/app.YYYY-MM-DD.log`, rotated daily, JSON lines
//! - Retention: files older than the configured number of days are removed
//! - `RUST_LOG` overrides the configured level

use chrono::{Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const APP_LOG_PREFIX: &str = "app";
const APP_LOG_SUFFIX: &str = "log";

pub const DEFAULT_TAIL_LINES: usize = 100;
pub const MAX_TAIL_LINES: usize = 1000;

/// Directory holding the rolling application logs
pub fn app_log_dir(log_dir: &Path) -> PathBuf {
    log_dir.join(APP_LOG_PREFIX)
}

/// Initialize the logging system
///
/// # Examples
/// ```ignore
/// // Development (console only)
/// init_logger("debug", false, None)?;
///
/// // Production (JSON console + daily file)
/// init_logger("info", true, Some(Path::new("/var/lib/print-agent/logs")))?;
/// ```
pub fn init_logger(level: &str, json_format: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let file_layer = match log_dir {
        Some(dir) => {
            let app_dir = app_log_dir(dir);
            fs::create_dir_all(&app_dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(APP_LOG_PREFIX)
                .filename_suffix(APP_LOG_SUFFIX)
                .build(&app_dir)?;
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(appender)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Date of an `app.YYYY-MM-DD.log` file name
fn log_file_date(name: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(APP_LOG_PREFIX)?
        .strip_prefix('.')?
        .strip_suffix(APP_LOG_SUFFIX)?
        .strip_suffix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete application logs older than `retention_days`; returns the count
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<usize> {
    let app_dir = app_log_dir(log_dir);
    if !app_dir.exists() {
        return Ok(0);
    }

    let cutoff = Local::now().date_naive() - chrono::Days::new(retention_days);
    let mut removed = 0;
    for entry in fs::read_dir(&app_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(date) = log_file_date(name)
            && date < cutoff
        {
            fs::remove_file(&path)?;
            tracing::info!(file = %name, "Deleted old log file");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Daily retention sweep until shutdown
pub async fn periodic_cleanup(log_dir: PathBuf, retention_days: u64, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let dir = log_dir.clone();
                match tokio::task::spawn_blocking(move || cleanup_old_logs(&dir, retention_days)).await {
                    Ok(Ok(n)) if n > 0 => tracing::info!(removed = n, "Log retention sweep complete"),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "Log cleanup failed"),
                    Err(e) => tracing::warn!(error = %e, "Log cleanup task failed"),
                }
            }
        }
    }
}

/// Newest application log file
fn newest_log(log_dir: &Path) -> io::Result<Option<PathBuf>> {
    let app_dir = app_log_dir(log_dir);
    if !app_dir.exists() {
        return Ok(None);
    }
    let mut newest: Option<(NaiveDate, PathBuf)> = None;
    for entry in fs::read_dir(&app_dir)? {
        let path = entry?.path();
        let date = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(log_file_date);
        if let Some(date) = date
            && newest.as_ref().is_none_or(|(d, _)| date > *d)
        {
            newest = Some((date, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Last `lines` lines of the newest application log (clamped to 1..=1000)
pub fn tail_log(log_dir: &Path, lines: usize) -> io::Result<Vec<String>> {
    let lines = lines.clamp(1, MAX_TAIL_LINES);
    let Some(path) = newest_log(log_dir)? else {
        return Ok(Vec::new());
    };
    let content = fs::read_to_string(path)?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(dir: &Path, date: NaiveDate, body: &str) -> PathBuf {
        let app = app_log_dir(dir);
        fs::create_dir_all(&app).unwrap();
        let path = app.join(format!("app.{}.log", date.format("%Y-%m-%d")));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_log_file_date_parsing() {
        assert_eq!(
            log_file_date("app.2026-03-01.log"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert!(log_file_date("app.log").is_none());
        assert!(log_file_date("audit.2026-03-01.log").is_none());
    }

    #[test]
    fn test_cleanup_removes_only_expired_logs() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().date_naive();
        let old = write_log(dir.path(), today - chrono::Days::new(30), "old\n");
        let fresh = write_log(dir.path(), today, "fresh\n");
        let other = app_log_dir(dir.path()).join("notes.txt");
        fs::write(&other, "keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 14).unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_tail_reads_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().date_naive();
        write_log(dir.path(), today - chrono::Days::new(1), "yesterday\n");
        write_log(dir.path(), today, "one\ntwo\nthree\n");

        assert_eq!(tail_log(dir.path(), 2).unwrap(), vec!["two", "three"]);
        assert_eq!(tail_log(dir.path(), 0).unwrap(), vec!["three"]);
        assert_eq!(tail_log(dir.path(), 50).unwrap().len(), 3);
    }

    #[test]
    fn test_tail_without_logs_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(tail_log(dir.path(), DEFAULT_TAIL_LINES).unwrap().is_empty());
    }
}
