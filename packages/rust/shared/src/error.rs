//! Error types for Scorchbook.
//!
//! Library crates use [`ScorchbookError`] via `thiserror`.
//! The CLI wraps this with `color-eyre`; the HTTP layer maps it to status codes.

use std::path::PathBuf;

/// Top-level error type for all Scorchbook operations.
#[derive(Debug, thiserror::Error)]
pub enum ScorchbookError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to search, page, or model endpoints.
    #[error("network error: {0}")]
    Network(String),

    /// Response or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or media store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM call failed (transport, API status, or response shape).
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// The model provider refused the credentials or the model.
    #[error("model access denied: {0}")]
    ModelAccessDenied(String),

    /// Speech transcription job failed or timed out.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (field constraints, malformed request).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated caller may not touch the resource.
    #[error("{0}")]
    Forbidden(String),

    /// Requested record does not exist.
    #[error("{0}")]
    NotFound(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScorchbookError>;

impl ScorchbookError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Message suitable for API clients: the bare text for caller-facing
    /// variants, the full display string otherwise.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { message } => message.clone(),
            Self::Unauthorized(m) | Self::Forbidden(m) | Self::NotFound(m) => m.clone(),
            other => other.to_string(),
        }
    }
}
