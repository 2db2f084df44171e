//! Logging setup

use crate::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Initialize the tracing subscriber with a console layer and a
/// daily-rolling file layer.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init<P: AsRef<Path>>(level: &str, log_file: P) -> Result<()> {
    let directory = log_file
        .as_ref()
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)?;
    let file_name = log_file
        .as_ref()
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("strategy-engine.log"));

    let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, file_name);

    let console_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
