//! Unified error model for the session controller and its collaborators.
//! Every variant carries a stable machine code plus a human message so the
//! same value can be logged, matched on, or shipped to a UI toast.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    #[error("{code}: {message}")]
    Auth { code: String, message: String },
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    /// Identity, profile or settings backend unreachable or rejecting the call.
    #[error("{code}: {message}")]
    Backend { code: String, message: String },
    /// Durable key-value surface failed (disk, serialization).
    #[error("{code}: {message}")]
    Storage { code: String, message: String },
    #[error("{code}: {message}")]
    Config { code: String, message: String },
    #[error("{code}: {message}")]
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Auth { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Backend { code, .. }
            | AppError::Storage { code, .. }
            | AppError::Config { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Auth { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Backend { message, .. }
            | AppError::Storage { message, .. }
            | AppError::Config { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn backend<S: Into<String>>(code: S, msg: S) -> Self { AppError::Backend { code: code.into(), message: msg.into() } }
    pub fn storage<S: Into<String>>(code: S, msg: S) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }
    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Failures worth retrying on the next tick rather than reporting loudly.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Backend { .. } | AppError::Storage { .. })
    }

    /// Short sentence suitable for a toast; never leaks the internal code.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Auth { .. } => "Invalid email or password.",
            AppError::NotFound { .. } => "The requested record could not be found.",
            AppError::Conflict { .. } => "Please wait, your session is being closed.",
            AppError::Backend { .. } => "The server could not be reached. Please try again.",
            AppError::Storage { .. } => "Local session data could not be saved.",
            AppError::Config { .. } => "Session settings are invalid.",
            AppError::Internal { .. } => "Something went wrong.",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage { code: "io_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage { code: "serde_error".into(), message: err.to_string() }
    }
}
