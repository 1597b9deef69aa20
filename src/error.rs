//! Error types for trainctl

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::registry::query::QueryError;

/// Main error type for trainctl operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operator declined a confirmation that the run cannot proceed without
    #[error("Declined: {0}")]
    Declined(String),

    /// The registry lock could not be acquired in time
    #[error("Timed out after {timeout:?} waiting for lock on {path}")]
    LockTimeout {
        /// Lock file path
        path: PathBuf,
        /// How long we waited
        timeout: Duration,
    },

    /// Duplicate-detection query could not be built or evaluated
    #[error("Registry query error: {0}")]
    Query(#[from] QueryError),

    /// Control channel failure (disconnect, bad frame)
    #[error("Control channel error: {0}")]
    Channel(String),

    /// Checkpoint save/load failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Child process management failure
    #[error("Process error: {0}")]
    Process(String),

    /// Driver used out of lifecycle order
    #[error("Invalid driver state: {0}")]
    State(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Index file error
    #[error("Index file error: {0}")]
    Csv(#[from] csv::Error),

    /// Settings loading error
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for trainctl operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a declined-confirmation error
    pub fn declined(msg: impl Into<String>) -> Self {
        Self::Declined(msg.into())
    }

    /// Create a channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Create a lifecycle error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Whether the operator chose to stop rather than something failing
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::Declined(_))
    }
}

/// Map the outcome of a training program to its process exit code.
///
/// This is the single place where a declined confirmation turns into a clean
/// exit: inner code only ever returns [`Error::Declined`].
pub fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Declined(reason)) => {
            info!("Stopping: {}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_is_distinguished() {
        assert!(Error::declined("no").is_declined());
        assert!(!Error::config("bad").is_declined());
    }

    #[test]
    fn test_exit_code_mapping() {
        let code = |r| format!("{:?}", exit_code(r));
        assert_eq!(code(Ok(())), format!("{:?}", ExitCode::SUCCESS));
        assert_eq!(code(Err(Error::declined("operator said no"))), format!("{:?}", ExitCode::SUCCESS));
        assert_eq!(code(Err(Error::config("missing key"))), format!("{:?}", ExitCode::FAILURE));
    }
}
