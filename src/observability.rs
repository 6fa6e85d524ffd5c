//! Logging and observability helpers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "fedquery.log";
const LOG_RETENTION_DAYS: u64 = 14;

/// Where and how verbosely to log.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Raise the default filter from `info` to `debug`
    pub debug: bool,
    /// Write daily rolling files here instead of stdout
    pub log_dir: Option<PathBuf>,
}

pub fn init_tracing(options: &LogOptions) {
    let default_filter = if options.debug {
        "fedquery=debug,fedquery_lib=debug"
    } else {
        "fedquery=info,fedquery_lib=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let writer = match &options.log_dir {
        Some(log_dir) => {
            let _ = fs::create_dir_all(log_dir);
            if let Err(e) = cleanup_old_logs(log_dir, LOG_RETENTION_DAYS) {
                eprintln!("Failed to clean up old logs: {}", e);
            }
            let file_appender: RollingFileAppender =
                tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            BoxMakeWriter::new(file_appender)
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .json()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();

    install_panic_hook();

    match &options.log_dir {
        Some(dir) => tracing::info!("Tracing initialized. Logs directory: {:?}", dir),
        None => tracing::info!("Tracing initialized. Logging to stdout"),
    }
}

fn install_panic_hook() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("PANIC: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("PANIC: {}", s)
        } else {
            "PANIC: unknown cause".to_string()
        };

        tracing::error!(target: "panic", location = %location, message = %msg, "Service panicked");

        previous_hook(panic_info);
    }));
}

/// Removes rolled log files (`fedquery.log.YYYY-MM-DD`) older than the
/// retention period.
fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<()> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();

        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if matches!(age, Some(age) if age > retention) {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {}", path, e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let recent = dir.path().join("fedquery.log.2026-01-01");
        let foreign = dir.path().join("notes.txt");
        fs::write(&recent, "{}").unwrap();
        fs::write(&foreign, "keep").unwrap();

        cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).unwrap();
        assert!(recent.exists());
        assert!(foreign.exists());

        cleanup_old_logs(dir.path(), 0).unwrap();
        assert!(foreign.exists());
    }
}
