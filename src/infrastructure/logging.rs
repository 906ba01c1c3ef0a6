use crate::domain::settings::{LogRotation, LogSettings};
use anyhow::Context;
use std::path::Path;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Dropping the guard flushes the file writer
    _guards: Vec<WorkerGuard>,
}

pub fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

/// `RUST_LOG` wins over the configured level
pub fn build_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Relative log dirs land under `base_dir`.
pub fn init_logger(settings: &LogSettings, base_dir: &Path) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // stdout carries the state feed, so console logs go to stderr
    let console_layer = settings.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = match &settings.file {
        Some(file) => {
            let dir = file.resolve_dir(base_dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::RollingFileAppender::new(
                rotation(file.rotation),
                &dir,
                &file.prefix,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_file(settings.show_file_line)
                    .with_line_number(settings.show_file_line)
                    .with_thread_ids(settings.show_thread_ids)
                    .with_target(settings.show_target),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(
        level = %settings.level,
        file = settings.file.is_some(),
        "logging initialized"
    );

    Ok(LoggingGuard { _guards: guards })
}
