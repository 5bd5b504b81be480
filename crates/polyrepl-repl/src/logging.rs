//! Tracing setup.
//!
//! stderr always gets a `fmt` layer filtered by `RUST_LOG`. With
//! `--log-path`, a second plain-text layer writes `polyrepl.log` in that
//! directory, filtered by `RUST_LOG` when it is set and at `info` for
//! polyrepl's own crates otherwise.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// File name used inside the log directory.
pub const LOG_FILE_NAME: &str = "polyrepl.log";

const FILE_DEFAULT_DIRECTIVES: &str = "polyrepl_repl=info,polyrepl_kernel=info";

/// Filter for the file layer: `rust_log` verbatim, or the defaults.
fn file_filter(rust_log: Option<&str>) -> EnvFilter {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::new(FILE_DEFAULT_DIRECTIVES),
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and closes the log file.
pub fn init(log_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());

    let (file_layer, guard) = match log_path {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
            let filter = file_filter(rust_log.as_deref());
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
