//! Diagnostic logging setup.
//!
//! This module provides:
//! - A console layer on stderr whose filter follows `--verbose`/`--quiet`,
//!   the configured filter, `RUST_LOG`, then [`DEFAULT_LOG_FILTER`]
//! - An optional daily-rolling file layer (`chapsplit.log.YYYY-MM-DD`)
//! - Log file retention cleanup (deletes logs older than 7 days)
//! - Local timezone timestamps for logs
//!
//! User-facing progress goes through the pipeline event channel, not here.

use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default console filter directive.
pub const DEFAULT_LOG_FILTER: &str = "chapsplit=warn,pipeline_common=warn,process_utils=warn";

/// Console filter for `--verbose`.
pub const VERBOSE_LOG_FILTER: &str = "chapsplit=debug,pipeline_common=debug,process_utils=debug";

/// Filter for the file layer, independent of the console.
pub const FILE_LOG_FILTER: &str = "chapsplit=debug,pipeline_common=info,process_utils=info";

/// Log retention period in days.
pub const LOG_RETENTION_DAYS: i64 = 7;

const LOG_FILE_PREFIX: &str = "chapsplit.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Inputs for [`init_logging`], already merged from CLI flags and config.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    pub verbose: bool,
    pub quiet: bool,
    /// Filter directive from the configuration file.
    pub filter: Option<String>,
    /// Directory for rolling log files; no file logging when absent.
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

/// Resolve the console filter.
pub fn console_filter(options: &LoggingOptions) -> Result<EnvFilter> {
    if options.quiet {
        return Ok(EnvFilter::new("error"));
    }
    if options.verbose {
        return Ok(EnvFilter::new(VERBOSE_LOG_FILTER));
    }
    if let Some(directive) = options.filter.as_deref().filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directive)
            .map_err(|e| Error::config(format!("Invalid log filter '{directive}': {e}")));
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file logging is enabled; keep it
/// alive for the lifetime of the process so buffered lines are flushed.
pub fn init_logging(options: &LoggingOptions) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi)
        .with_target(false)
        .with_timer(LocalTimer)
        .with_filter(console_filter(options)?);

    let (file_layer, guard) = match options.log_dir.as_deref() {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .with_filter(EnvFilter::new(FILE_LOG_FILTER));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Delete log files older than `retention_days`. Returns how many were removed.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let cutoff_ts = cutoff.timestamp();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;
    let prefix = format!("{LOG_FILE_PREFIX}.");

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // chapsplit.log.YYYY-MM-DD
        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        let file_ts = file_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);

        if file_ts < cutoff_ts {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}
