//! Shared tracing setup for the serve / cli binaries (feature `tracing-init`):
//! env-filtered fmt layer plus a daily-rotated file appender under
//! `~/.maestro/logs`.

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Directory for log files: `~/.maestro/logs`.
pub fn log_dir() -> PathBuf {
    crate::maestro_home().join("logs")
}

/// Initializes tracing with `RUST_LOG` filtering (default `info`) and a
/// non-blocking daily file appender. Returns the appender guard; drop it only
/// at process exit or buffered lines are lost.
pub fn init(file_prefix: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let dir = log_dir();
    let _ = std::fs::create_dir_all(&dir);
    let appender = tracing_appender::rolling::daily(dir, file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter),
        )
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            ),
        )
        .try_init();
    guard
}
