//! provides logging helpers

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Number of rotated log files kept next to the active one.
const MAX_LOG_FILES: usize = 3;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Builds a daily rolling appender for `log_file`, creating its parent directory.
pub fn rolling_appender(log_file: &Path) -> io::Result<RollingFileAppender> {
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;

    std::fs::create_dir_all(dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(io::Error::other)
}

/// initiate the global tracing subscriber
///
/// Events always go to stderr. When `log_file` is given they are also written to a
/// daily rolling file; the returned guard must be held until exit so buffered lines
/// get flushed.
pub fn init(log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let stderr_layer = layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let Some(log_file) = log_file else {
        registry().with(stderr_layer).init();
        return Ok(None);
    };

    let (file_writer, guard) = tracing_appender::non_blocking(rolling_appender(log_file)?);
    let file_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter());

    registry().with(stderr_layer).with(file_layer).init();
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_appender_creates_missing_directory() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let log_file = dir.path().join("nested").join("plugin.log");

        rolling_appender(&log_file).expect("should build appender");

        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn rolling_appender_rejects_path_without_file_name() {
        let err = rolling_appender(Path::new("/")).expect_err("root has no file name");
        similar_asserts::assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
