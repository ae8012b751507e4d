// WCBT: working copy backup tool.
// Copyright 2025 WCBT developers.

//! Tracing setup for the CLI: terse stderr output, with an optional
//! non-blocking log file carrying the full detail.

use std::path::Path;

use tracing::metadata::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

pub struct LoggingOptions<'a> {
    pub debug: bool,
    pub log_file: Option<&'a Path>,
}

/// Guards the non-blocking file writer; pending lines flush on drop.
pub struct LogGuard {
    _worker_guard: Option<WorkerGuard>,
}

pub fn init(options: LoggingOptions<'_>) -> Result<LogGuard, String> {
    let level = if options.debug {
        LevelFilter::TRACE
    } else {
        LevelFilter::WARN
    };
    let stderr_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(level);

    let mut worker_guard = None;
    let file_layer = match options.log_file {
        Some(path) => {
            let directory = path.parent().ok_or("can't resolve log file directory")?;
            let file_name = path
                .file_name()
                .ok_or("can't get log file name")?
                .to_string_lossy()
                .to_string();
            let writer = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(writer);
            worker_guard = Some(guard);
            Some(
                fmt::Layer::default()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    Registry::default()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| "failed to set global default logger".to_string())?;

    Ok(LogGuard {
        _worker_guard: worker_guard,
    })
}
