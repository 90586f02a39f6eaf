// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::interpret::errors::ErrorCode;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawnFailed(String),

    #[error("Process communication failed: {0}")]
    ProcessCommunicationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    /// Fine-grained code used when this error is surfaced to callers as a
    /// structured client error.
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkerError::ConfigError(_) => ErrorCode::InvalidConfiguration,
            WorkerError::Validation(_) => ErrorCode::ValidationFailed,
            WorkerError::ProcessSpawnFailed(_) => ErrorCode::ProcessSpawnFailed,
            WorkerError::ProcessCommunicationFailed(_) => ErrorCode::ProcessCommunicationFailed,
            WorkerError::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorCode::PermissionDenied
            }
            WorkerError::JsonError(_) => ErrorCode::ResponseParseError,
            WorkerError::TomlError(_) => ErrorCode::InvalidConfiguration,
            WorkerError::IoError(_) | WorkerError::Other(_) => ErrorCode::Unknown,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkerError>;
