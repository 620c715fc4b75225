//! Tracing setup for the CLI and server.
//!
//! `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` with
//! `--verbose`. Output goes to stderr as human-readable or JSON lines. When a
//! log directory is given, a daily-rolling JSON file is written there too.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "taskforge.log";

fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose)))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file sink on drop and must be held for the
/// life of the process. Installing twice is a no-op.
pub fn init(verbose: bool, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_writer, guard) = match log_dir {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (Some(writer), Some(guard))
            }
            Err(e) => {
                eprintln!("Failed to create log directory {}: {}", dir.display(), e);
                (None, None)
            }
        },
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| fmt::layer().json().with_ansi(false).with_writer(writer));
    let registry = tracing_subscriber::registry()
        .with(filter(verbose))
        .with(file_layer);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    guard
}
