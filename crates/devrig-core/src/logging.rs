//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter
pub const LOG_ENV_VAR: &str = "DEVRIG_LOG";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/devrig/logs/`.
/// Log level is controlled by the `DEVRIG_LOG` environment variable.
///
/// # Examples
/// ```bash
/// DEVRIG_LOG=debug devrig session
/// DEVRIG_LOG=devrig_driver=trace devrig hierarchy
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "devrig.log");

    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new("devrig=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("devrig starting (pid {})", std::process::id());
    tracing::info!("Log directory: {}", log_dir.display());

    Ok(())
}

/// Directory holding the daily `devrig.log.<date>` files
pub fn log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("devrig").join("logs")
}
