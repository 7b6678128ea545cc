//! Logging setup for BundlePatch.
//!
//! Sends `tracing` output to two places:
//! - `logs/bundlepatch.log`, truncated at session start, no ANSI colours
//! - stdout, for following a patch run in the terminal
//!
//! The filter comes from `RUST_LOG` and falls back to the level given by the
//! caller.

use std::fs;
use std::io;
use std::path::Path;

use time::format_description::FormatItem;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Timestamp layout used in the log file.
const FILE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialise logging with an `info` default level.
///
/// See [`init_logging_with_level`].
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    init_logging_with_level(log_dir, log_file, "info")
}

/// Initialise logging to `log_dir/log_file` and stdout.
///
/// Creates the log directory if needed and clears any previous log file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot
/// be truncated.
pub fn init_logging_with_level(
    log_dir: &Path,
    log_file: &str,
    default_level: &str,
) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_timer(LocalTime::new(FILE_TIME_FORMAT))
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory, under the user's data directory when available.
pub fn default_log_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("bundlepatch").join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"))
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "bundlepatch.log"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_file(), "bundlepatch.log");
        assert!(default_log_dir().ends_with("logs"));
    }

    #[test]
    fn test_time_format_renders() {
        let now = time::OffsetDateTime::UNIX_EPOCH;
        let rendered = now.format(FILE_TIME_FORMAT).unwrap();
        assert_eq!(rendered, "1970-01-01 00:00:00.000");
    }
}
