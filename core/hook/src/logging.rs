//! File logging for the hook CLI.
//!
//! Hooks run inside the assistant's process tree, so nothing goes to stdout or
//! stderr. Logs land in `~/.jacques/logs/hook.log.<date>`.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEBUG_ENV: &str = "JACQUES_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "hook.log";

/// Installs the file subscriber. The returned guard flushes on drop and must
/// live until the process exits; `None` means logging is disabled.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = log_dir()?;
    fs_err::create_dir_all(&log_dir).ok()?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter(env::var(DEBUG_ENV).ok().as_deref()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer),
        )
        .try_init()
        .ok()?;

    Some(guard)
}

fn log_dir() -> Option<PathBuf> {
    crate::client::data_dir().ok().map(|dir| dir.join("logs"))
}

fn filter(debug_flag: Option<&str>) -> EnvFilter {
    let debug_enabled = debug_flag
        .map(|value| matches!(value, "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
