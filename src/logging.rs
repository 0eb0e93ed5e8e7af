//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and to a file. `DOCRAG_LOG_FILE` selects the
//! file; otherwise logs are appended to `logs/docrag.log`. The file writer is non-blocking and
//! its guard lives for the rest of the process.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure tracing subscribers for stdout and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Installs a compact stdout layer and, when the log file can be opened, a file layer.
pub fn init_tracing() {
    install(default_filter("info"));
}

/// Like [`init_tracing`], but raises this crate's default level to `debug` when `verbose` is set.
///
/// An explicit `RUST_LOG` still wins.
pub fn init_tracing_verbose(verbose: bool) {
    let fallback = if verbose { "info,docrag=debug" } else { "info" };
    install(default_filter(fallback));
}

fn default_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn install(env_filter: EnvFilter) {
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Returns `None` when the log file or its directory cannot be created.
fn configure_file_writer() -> Option<NonBlocking> {
    match std::env::var("DOCRAG_LOG_FILE") {
        Ok(path) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => Some(keep_guard(tracing_appender::non_blocking(file))),
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        },
        Err(_) => {
            if let Err(err) = std::fs::create_dir_all("logs") {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let file_appender = tracing_appender::rolling::never("logs", "docrag.log");
            Some(keep_guard(tracing_appender::non_blocking(file_appender)))
        }
    }
}

fn keep_guard((writer, guard): (NonBlocking, WorkerGuard)) -> NonBlocking {
    let _ = LOG_GUARD.set(guard);
    writer
}
