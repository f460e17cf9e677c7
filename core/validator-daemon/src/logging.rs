//! Logging setup: stderr plus a daily-rolling file under the state dir.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "VALIDATOR_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "validator.log";

/// The returned guard flushes the file writer on drop; keep it for the life
/// of the process.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    if let Err(err) = fs_err::create_dir_all(log_dir) {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(stderr_layer)
            .init();
        tracing::warn!(error = %err, "Failed to create log directory; logging to stderr only");
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
