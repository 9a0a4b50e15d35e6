//! Tracing subscriber setup.

use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to the
/// configured file when it can be opened and to stdout otherwise. The returned
/// guard flushes buffered lines when dropped and must outlive the program.
pub fn init(config: &LoggingConfig) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let file = config.output.as_deref().and_then(open_output);
    let to_file = file.is_some();
    let (writer, guard) = match file {
        Some(file) => tracing_appender::non_blocking(file),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_ansi(!to_file).with_writer(writer))
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }

    guard
}

/// Filter directive for a configured level; accepts the upper-case legacy names.
fn default_directive(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level.is_empty() {
        "info".to_owned()
    } else {
        level
    }
}

fn open_output(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!(
                "unable to open log file {}, using stdout: {e}",
                path.display()
            );
            None
        }
    }
}
