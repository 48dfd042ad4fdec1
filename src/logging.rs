//! Log output for the watcher.
//!
//! Lines go to stdout and to a log file that is appended to across restarts,
//! so the per-feed failure history of a long-running watcher is kept.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{Result, WatchError};

/// Dependencies kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn"];

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let explicit = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let mut filter = EnvFilter::from_default_env().add_directive(parse_level(level).into());
    if !explicit {
        for target in QUIET_TARGETS {
            if let Ok(directive) = target.parse::<Directive>() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Open the log file for appending, creating it and its directory.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn log_startup(path: &Path) {
    info!(
        "issuewatch {} started, logging to {}",
        env!("CARGO_PKG_VERSION"),
        path.display()
    );
}

/// Install the global subscriber writing to stdout and the configured file.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let path = Path::new(&config.file);
    let log_file = Arc::new(open_log_file(path)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(log_file))
                .with_ansi(false)
                .with_target(true),
        )
        .with(env_filter(&config.level))
        .try_init()
        .map_err(|e| WatchError::Config(format!("failed to install log subscriber: {e}")))?;

    log_startup(path);
    Ok(())
}

/// Console-only fallback when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true),
        )
        .with(env_filter(level))
        .try_init();
}
