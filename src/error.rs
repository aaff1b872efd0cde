//! Error types for RiceRound.
//!
//! All errors in RiceRound are represented by the `RiceError` enum,
//! which provides specific variants for different error categories.

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an authentication attempt failed.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthCode {
    /// The server rejected the token (HTTP 401).
    Unauthorized,
    /// No usable token is stored locally.
    NoToken,
    /// HTTP 500 from the auth endpoint.
    InternalError,
    /// HTTP 503 from the auth endpoint.
    ServiceUnavailable,
    Timeout,
    Network,
    Request,
    Unknown,
}

impl AuthCode {
    /// Whether the user has to log in again to recover.
    pub fn needs_login(&self) -> bool {
        matches!(self, AuthCode::Unauthorized | AuthCode::NoToken)
    }
}

/// Unified error type for all RiceRound operations.
///
/// Each variant represents a specific category of error that can occur
/// while packaging a workflow, talking to the backend, or tracking a task.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum RiceError {
    /// Malformed or circular graph input to the encryption pipeline.
    #[error("{0}")]
    Validation(String),

    /// Missing, expired or invalid credential.
    #[error("auth error ({}): {message}", .code.as_ref())]
    Auth {
        code: AuthCode,
        message: String,
    },

    /// Transport level HTTP failure.
    #[error("{0}")]
    Network(String),

    /// HTTP request timed out.
    #[error("{0}")]
    Timeout(String),

    /// Backend envelope with a non-zero code.
    #[error("api error {code}: {message}")]
    Api {
        code: i64,
        message: String,
    },

    /// The account balance does not cover the task.
    #[error("{0}")]
    InsufficientBalance(String),

    /// A remote task ended without usable results.
    #[error("{0}")]
    TaskFailed(String),

    /// WebSocket channel faults.
    #[error("{0}")]
    Channel(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("{0}")]
    Convert(String),

    /// Archive creation errors.
    #[error("{0}")]
    Archive(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl RiceError {
    pub(crate) fn auth(
        code: AuthCode,
        message: impl Into<String>,
    ) -> Self {
        RiceError::Auth {
            code,
            message: message.into(),
        }
    }
}

impl From<RiceError> for String {
    fn from(val: RiceError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for RiceError {
    fn from(error: std::io::Error) -> Self {
        RiceError::IoError(error.to_string())
    }
}

impl From<RiceError> for std::io::Error {
    fn from(val: RiceError) -> Self {
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<serde_json::Error> for RiceError {
    fn from(error: serde_json::Error) -> Self {
        RiceError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for RiceError {
    fn from(error: toml::de::Error) -> Self {
        RiceError::Config(error.to_string())
    }
}

impl From<toml::ser::Error> for RiceError {
    fn from(error: toml::ser::Error) -> Self {
        RiceError::Config(error.to_string())
    }
}

impl From<reqwest::Error> for RiceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RiceError::Timeout(error.to_string())
        } else {
            RiceError::Network(error.to_string())
        }
    }
}

impl From<zip::result::ZipError> for RiceError {
    fn from(error: zip::result::ZipError) -> Self {
        RiceError::Archive(error.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RiceError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        RiceError::Channel(error.to_string())
    }
}
