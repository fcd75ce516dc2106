//! Logging setup with file rotation.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingSettings;

const LOG_PREFIX: &str = "mineguard";
const MAX_LOG_FILES: usize = 7;

/// Installs a daily-rotated file layer under `<data_dir>/<directory>` and,
/// when enabled, a coloured console layer. `RUST_LOG` overrides the
/// configured level.
pub fn init_logging(
    settings: &LoggingSettings,
    data_dir: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let logs_dir = data_dir.join(&settings.directory);
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)?;

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let console_layer = settings
        .console
        .then(|| fmt::layer().with_target(true).with_ansi(true));

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
