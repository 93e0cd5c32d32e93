// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Subscriber construction from the `logLevel` / `logFile` settings.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;

/// The log levels a network configuration may ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Panic,
    Error,
    #[strum(to_string = "warning", serialize = "warn")]
    Warning,
    #[default]
    Info,
    Debug,
}

pub const DEFAULT_LOGLEVEL: LogLevel = LogLevel::Info;

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            // nothing is logged at panic level, errors are the closest thing
            LogLevel::Panic | LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceCtlError {
    #[error("invalid log level '{0}'")]
    LogLevel(String),
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tracing was already initialized")]
    AlreadyInitialized,
}

impl LogLevel {
    /// Parse an optional configured level, falling back to [`DEFAULT_LOGLEVEL`].
    pub fn from_config(level: Option<&str>) -> Result<Self, TraceCtlError> {
        match level {
            None | Some("") => Ok(DEFAULT_LOGLEVEL),
            Some(level) => LogLevel::from_str(&level.to_ascii_lowercase())
                .map_err(|_| TraceCtlError::LogLevel(level.to_string())),
        }
    }
}

/// Build a subscriber logging at `level` (overridable through `RUST_LOG`) to `log_file`, or to
/// stderr if no file is given.  Stdout belongs to the CNI result and is never written.
pub fn subscriber(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<impl Subscriber + Send + Sync + 'static, TraceCtlError> {
    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| TraceCtlError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();
    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_target(true)))
}

/// Install the process wide subscriber.
pub fn init_tracing(level: LogLevel, log_file: Option<&Path>) -> Result<(), TraceCtlError> {
    tracing::subscriber::set_global_default(subscriber(level, log_file)?)
        .map_err(|_| TraceCtlError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::{LogLevel, TraceCtlError, subscriber};
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn parse_levels() {
        assert_eq!(LogLevel::from_config(None).unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_config(Some("")).unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_config(Some("debug")).unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_config(Some("Warning")).unwrap(), LogLevel::Warning);
        assert_eq!(LogLevel::from_config(Some("warn")).unwrap(), LogLevel::Warning);
        assert_eq!(LogLevel::from_config(Some("panic")).unwrap(), LogLevel::Panic);
        assert!(matches!(
            LogLevel::from_config(Some("verbose")),
            Err(TraceCtlError::LogLevel(_))
        ));
        assert_eq!(LogLevel::Warning.to_string(), "warning");
        assert_eq!(LevelFilter::from(LogLevel::Panic), LevelFilter::ERROR);
    }

    #[test]
    fn logs_go_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sriov.log");
        let subscriber = subscriber(LogLevel::Warning, Some(&path)).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("filtered out");
            tracing::warn!("kept");
        });
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("kept"));
        assert!(!content.contains("filtered out"));
    }

    #[test]
    fn unwritable_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("sriov.log");
        assert!(matches!(
            subscriber(LogLevel::Info, Some(&path)),
            Err(TraceCtlError::LogFile { .. })
        ));
    }
}
