// src/interpret/errors.rs

//! Structured client errors: a closed set of types and codes, inferred from
//! message text when the caller does not know them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::errors::WorkerError;
use crate::events::{EventSink, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Validation,
    Process,
    Timeout,
    Sdk,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    InvalidConfiguration,
    ProcessSpawnFailed,
    ProcessCommunicationFailed,
    UnexpectedTermination,
    PermissionDenied,
    ExecutionTimeout,
    GracefulShutdownTimeout,
    InactivityTimeout,
    SdkConfigurationError,
    ResponseParseError,
    SdkConnectionFailed,
    Unknown,
}

impl ErrorCode {
    pub fn error_type(self) -> ErrorType {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidConfiguration => ErrorType::Validation,
            ErrorCode::ProcessSpawnFailed
            | ErrorCode::ProcessCommunicationFailed
            | ErrorCode::UnexpectedTermination
            | ErrorCode::PermissionDenied => ErrorType::Process,
            ErrorCode::ExecutionTimeout
            | ErrorCode::GracefulShutdownTimeout
            | ErrorCode::InactivityTimeout => ErrorType::Timeout,
            ErrorCode::SdkConfigurationError
            | ErrorCode::ResponseParseError
            | ErrorCode::SdkConnectionFailed => ErrorType::Sdk,
            ErrorCode::Unknown => ErrorType::Unknown,
        }
    }

    /// Codes a caller may retry. Everything else is final.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorCode::ExecutionTimeout
                | ErrorCode::InactivityTimeout
                | ErrorCode::ProcessCommunicationFailed
                | ErrorCode::SdkConnectionFailed
                | ErrorCode::UnexpectedTermination
        )
    }
}

/// Error record surfaced to callers and published on the event sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub code: ErrorCode,
    pub message: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ClientError {
    pub fn new(code: ErrorCode, message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            error_type: code.error_type(),
            code,
            message: message.into(),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
            recoverable: code.is_recoverable(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn from_worker_error(err: &WorkerError, correlation_id: &str) -> Self {
        match err.code() {
            ErrorCode::Unknown => categorize_error(&err.to_string(), None, None, correlation_id),
            code => Self::new(code, err.to_string(), correlation_id),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.error_type, self.code, self.message)
    }
}

const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline"];
const VALIDATION_KEYWORDS: &[&str] = &["validation", "invalid", "required", "schema", "must be"];
const PROCESS_KEYWORDS: &[&str] = &[
    "spawn",
    "enoent",
    "no such file",
    "not found",
    "permission denied",
    "eacces",
    "eperm",
    "epipe",
    "broken pipe",
    "stdin",
    "communication",
    "exited",
    "killed",
    "signal",
];
const SDK_KEYWORDS: &[&str] = &[
    "sdk",
    "api key",
    "connection",
    "econnrefused",
    "network",
    "parse",
    "json",
    "configuration",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Infer an error type from message text.
pub fn infer_type(message: &str) -> ErrorType {
    let msg = message.to_lowercase();
    if contains_any(&msg, TIMEOUT_KEYWORDS) {
        ErrorType::Timeout
    } else if contains_any(&msg, VALIDATION_KEYWORDS) {
        ErrorType::Validation
    } else if contains_any(&msg, PROCESS_KEYWORDS) {
        ErrorType::Process
    } else if contains_any(&msg, SDK_KEYWORDS) {
        ErrorType::Sdk
    } else {
        ErrorType::Unknown
    }
}

/// Pick the most specific code of `error_type` that the message supports.
pub fn infer_code(error_type: ErrorType, message: &str) -> ErrorCode {
    let msg = message.to_lowercase();
    match error_type {
        ErrorType::Validation => {
            if msg.contains("config") {
                ErrorCode::InvalidConfiguration
            } else {
                ErrorCode::ValidationFailed
            }
        }
        ErrorType::Process => {
            if contains_any(&msg, &["permission denied", "eacces", "eperm"]) {
                ErrorCode::PermissionDenied
            } else if contains_any(&msg, &["spawn", "enoent", "no such file", "not found"]) {
                ErrorCode::ProcessSpawnFailed
            } else if contains_any(&msg, &["epipe", "broken pipe", "stdin", "communication"]) {
                ErrorCode::ProcessCommunicationFailed
            } else {
                ErrorCode::UnexpectedTermination
            }
        }
        ErrorType::Timeout => {
            if msg.contains("inactivity") {
                ErrorCode::InactivityTimeout
            } else if contains_any(&msg, &["graceful", "shutdown"]) {
                ErrorCode::GracefulShutdownTimeout
            } else {
                ErrorCode::ExecutionTimeout
            }
        }
        ErrorType::Sdk => {
            if contains_any(&msg, &["connection", "econnrefused", "network"]) {
                ErrorCode::SdkConnectionFailed
            } else if contains_any(&msg, &["parse", "json"]) {
                ErrorCode::ResponseParseError
            } else {
                ErrorCode::SdkConfigurationError
            }
        }
        ErrorType::Unknown => ErrorCode::Unknown,
    }
}

/// Build a [`ClientError`], using explicit type/code when given and
/// inferring the rest from the message.
///
/// An explicit code always wins; its type follows from it.
pub fn categorize_error(
    message: &str,
    error_type: Option<ErrorType>,
    code: Option<ErrorCode>,
    correlation_id: &str,
) -> ClientError {
    let code = code.unwrap_or_else(|| {
        let ty = error_type.unwrap_or_else(|| infer_type(message));
        infer_code(ty, message)
    });
    ClientError::new(code, message, correlation_id)
}

/// Categorize, log and publish an error.
pub fn handle_error(
    sink: &EventSink,
    message: &str,
    code: Option<ErrorCode>,
    correlation_id: &str,
) -> ClientError {
    let err = categorize_error(message, None, code, correlation_id);
    if err.recoverable {
        warn!(
            correlation_id,
            code = ?err.code,
            error = %err.message,
            "recoverable client error"
        );
    } else {
        error!(
            correlation_id,
            code = ?err.code,
            error = %err.message,
            "client error"
        );
    }
    sink.emit(WorkerEvent::ClientError(err.clone()));
    err
}
