//! Logging setup: human-readable stderr plus a daily rolling file under the
//! data directory. `THREAD_LIFECYCLE_DEBUG_LOG=1` forces debug level.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "thread-lifecycle.log";

fn filter() -> EnvFilter {
    let debug_enabled = env::var("THREAD_LIFECYCLE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. The returned guard flushes the file writer
/// and must be held until the process exits. Falls back to stderr only when
/// the log directory cannot be created.
pub fn init(data_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let log_dir = data_dir.map(|dir| dir.join("logs"));
    let file_ready = log_dir
        .as_deref()
        .map(|dir| fs_err::create_dir_all(dir).is_ok())
        .unwrap_or(false);

    match log_dir {
        Some(dir) if file_ready => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        _ => {
            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}
