use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use colored::*;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Run not found: {0}")]
    RunNotFound(PathBuf),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Trainctl(trainctl::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl CliError {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CliError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CliError::WorkerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CliError::RunNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CONFIG",
            CliError::BadRequest(_) => "BAD_REQUEST",
            CliError::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
            CliError::RunNotFound(_) => "RUN_NOT_FOUND",
            CliError::Server(_) => "SERVER",
            CliError::Io(_) => "IO",
            CliError::Serialization(_) => "SERIALIZATION",
            CliError::Trainctl(_) | CliError::Other(_) => "INTERNAL",
        }
    }

    /// Print a user-friendly error message
    pub fn print_error(&self) {
        eprintln!("{} {}", "Error:".red().bold(), self);

        match self {
            CliError::RunNotFound(_) => {
                eprintln!(
                    "\n{} Run {} to see recorded experiments",
                    "Hint:".yellow(),
                    "trainctl runs list".cyan()
                );
            }
            CliError::WorkerUnavailable(_) => {
                eprintln!(
                    "\n{} Check that the training program is running and serving its control channel",
                    "Hint:".yellow()
                );
            }
            CliError::Server(_) => {
                eprintln!(
                    "\n{} Check that the port is not already in use",
                    "Hint:".yellow()
                );
            }
            _ => {}
        }
    }
}

impl From<trainctl::Error> for CliError {
    fn from(err: trainctl::Error) -> Self {
        match err {
            trainctl::Error::Channel(msg) => CliError::WorkerUnavailable(msg),
            trainctl::Error::Config(msg) => CliError::Config(msg),
            other => CliError::Trainctl(other),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Serialization(err.to_string())
    }
}

impl IntoResponse for CliError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_worker_maps_to_service_unavailable() {
        let err = CliError::from(trainctl::Error::channel("worker disconnected"));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_bad_request_status() {
        assert_eq!(
            CliError::BadRequest("two controls".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
