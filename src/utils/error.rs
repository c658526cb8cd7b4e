//! Error types and handling
//!
//! Application-wide error type wrapping the per-module errors, plus the
//! mapping from errors to process exit codes.

use crate::capture::{ConfigurationError, DriverError};
use crate::container::ContainerError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("No cameras detected")]
    NoCameras,

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Recording task failed: {0}")]
    Task(String),
}

impl AppError {
    /// Process exit code reported when this error ends the run
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Settings(_) | AppError::Serialization(_) => 2,
            AppError::NoCameras => 3,
            AppError::Configuration(_) | AppError::Container(_) | AppError::Driver(_) => 4,
            AppError::Io(_) | AppError::Task(_) => 1,
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
