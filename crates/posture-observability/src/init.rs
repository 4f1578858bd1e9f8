// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for the posture client
//!
//! Console output always; with the `file-logging` feature and a configured
//! `log_dir`, a JSON log file per run:
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── posture.log
//! ```

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, LoggingSettings};

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging initialization result
///
/// Keep it alive for the lifetime of the process; dropping it flushes and
/// stops the background file writer.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder receiving log files, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Filter directives for the subscriber
///
/// Explicit debug flags win; otherwise a non-empty `RUST_LOG` is honoured;
/// otherwise the configured level applies to everything.
pub fn filter_directives(debug_flags: &CrateDebugFlags, settings: &LoggingSettings) -> String {
    if !debug_flags.any_enabled() {
        if let Ok(rust_log) = env::var("RUST_LOG") {
            if !rust_log.trim().is_empty() {
                return rust_log;
            }
        }
    }
    debug_flags.to_filter_string(&settings.level)
}

fn new_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .with_context(|| format!("Invalid log filter directives: {}", directives))
}

/// Initialize logging with console output and optional file output
///
/// # Errors
/// Fails on invalid filter directives, an unwritable log directory, or when a
/// global subscriber is already installed.
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    settings: &LoggingSettings,
) -> Result<LoggingGuard> {
    let directives = filter_directives(debug_flags, settings);
    let mut layers: Vec<BoxedLayer> = Vec::new();

    // Console goes to stderr so tool output on stdout stays clean
    let console_layer = match settings.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(new_filter(&directives)?)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_target(true)
            .with_filter(new_filter(&directives)?)
            .boxed(),
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let mut file_guards = Vec::new();
    #[allow(unused_mut)]
    let mut run_folder: Option<PathBuf> = None;
    #[allow(unused_mut)]
    let mut ignored_log_dir: Option<PathBuf> = None;

    if let Some(base_log_dir) = &settings.log_dir {
        #[cfg(feature = "file-logging")]
        {
            let folder = create_run_folder(base_log_dir)?;
            cleanup_old_logs(base_log_dir, settings.retention_runs)?;

            let file_appender = tracing_appender::rolling::daily(&folder, "posture.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            file_guards.push(guard);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(new_filter(&directives)?)
                .boxed();
            layers.push(file_layer);
            run_folder = Some(folder);
        }
        #[cfg(not(feature = "file-logging"))]
        {
            ignored_log_dir = Some(base_log_dir.clone());
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install the global tracing subscriber")?;

    if let Some(dir) = ignored_log_dir {
        tracing::warn!(
            "log_dir {} ignored: built without the file-logging feature",
            dir.display()
        );
    }

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir: run_folder,
    })
}

/// Initialize logging with default settings
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    init_logging(debug_flags, &LoggingSettings::default())
}

#[cfg_attr(not(feature = "file-logging"), allow(dead_code))]
fn create_run_folder(base_log_dir: &Path) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format(RUN_TIMESTAMP_FORMAT);
    let run_folder = base_log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
    Ok(run_folder)
}

/// Keep only the `retention_runs` most recent run folders
#[cfg_attr(not(feature = "file-logging"), allow(dead_code))]
fn cleanup_old_logs(base_log_dir: &Path, retention_runs: usize) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let started = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(RUN_PREFIX))
            .and_then(|ts| NaiveDateTime::parse_from_str(ts, RUN_TIMESTAMP_FORMAT).ok());
        if let Some(started) = started {
            runs.push((path, started));
        }
    }

    if runs.len() <= retention_runs {
        return Ok(());
    }

    // Oldest first
    runs.sort_by_key(|(_, started)| *started);
    let to_remove = runs.len() - retention_runs;
    for (path, _) in runs.iter().take(to_remove) {
        if let Err(e) = std::fs::remove_dir_all(path) {
            eprintln!(
                "Warning: Failed to remove old log directory {}: {}",
                path.display(),
                e
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cleanup_keeps_most_recent_runs() {
        let dir = tempdir().unwrap();
        for minute in 0..5 {
            std::fs::create_dir(dir.path().join(format!("run_20250101_12{:02}00", minute))).unwrap();
        }
        std::fs::create_dir(dir.path().join("not_a_run")).unwrap();

        cleanup_old_logs(dir.path(), 2).unwrap();

        assert!(!dir.path().join("run_20250101_120000").exists());
        assert!(!dir.path().join("run_20250101_120200").exists());
        assert!(dir.path().join("run_20250101_120300").exists());
        assert!(dir.path().join("run_20250101_120400").exists());
        assert!(dir.path().join("not_a_run").exists());
    }

    #[test]
    fn test_cleanup_missing_directory_is_ok() {
        let dir = tempdir().unwrap();
        assert!(cleanup_old_logs(&dir.path().join("absent"), 3).is_ok());
    }

    #[test]
    fn test_create_run_folder() {
        let dir = tempdir().unwrap();
        let run = create_run_folder(dir.path()).unwrap();
        assert!(run.is_dir());
        let name = run.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(RUN_PREFIX));
    }

    #[test]
    fn test_debug_flags_override_level() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-posture-agent".to_string()]);
        let settings = LoggingSettings {
            level: "warn".to_string(),
            ..LoggingSettings::default()
        };
        assert_eq!(
            filter_directives(&flags, &settings),
            "posture_agent=debug,warn"
        );
    }
}
