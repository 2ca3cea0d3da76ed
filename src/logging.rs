use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with: stdout");

    // `RUST_LOG` wins over the given level if set.
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(stdout_level.to_string()));

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(stdout_filter);

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let maybe_file_layer = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "serial-imu.log");

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        Some(file_layer)
    } else {
        None
    };

    // Another subscriber may already be installed, e.g. by the host application.
    if registry.with(maybe_file_layer).try_init().is_err() {
        message += " (not installed, a global subscriber already exists)";
    }

    debug!("{message}");
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: Mutex<bool> = parking_lot::const_mutex(false);

    let mut initialized = TRACING_IS_INITIALIZED.lock();

    if *initialized {
        return;
    }

    do_init(stdout_level, file_logging);
    *initialized = true;

    info!("Logging initialized");
}
