use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use thiserror::Error;

/// Logging configuration file, relative to the working directory.
pub const LOG_CONFIG_FILE: &str = "log4rs.yaml";

const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:5})} {t} - {m}{n}";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to load logging configuration: {0}")]
    File(String),
    #[error("Invalid logging configuration: {0}")]
    Config(String),
    #[error("Logger already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Initialise logging from [`LOG_CONFIG_FILE`] if it exists, or log `info`
/// and above to the console otherwise.
pub fn init() -> Result<(), LoggingError> {
    if Path::new(LOG_CONFIG_FILE).exists() {
        log4rs::init_file(LOG_CONFIG_FILE, Default::default())
            .map_err(|err| LoggingError::File(err.to_string()))?;
        info!("Initialised logging from {LOG_CONFIG_FILE}");
    } else {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info))
            .map_err(|err| LoggingError::Config(err.to_string()))?;
        log4rs::init_config(config)
            .map_err(|err| LoggingError::AlreadyInitialised(err.to_string()))?;
        info!("Initialised console logging");
    }
    Ok(())
}

/// A unique identifier for one reconciliation pass, used to correlate its log lines.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct OperationId(pub usize);

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sync{}", self.0)
    }
}

impl OperationId {
    /// Atomically get the next ID. This wraps around back to zero if you somehow exceed a usize.
    pub fn next() -> OperationId {
        static OPERATION_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        OperationId(OPERATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_increase() {
        let first = OperationId::next();
        let second = OperationId::next();
        assert!(second > first);
        assert_eq!(OperationId(7).to_string(), "sync7");
    }
}
