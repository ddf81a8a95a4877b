//! Custom error types for rusts2ag.
//!
//! All library functions return `Result<T, S2agError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rusts2ag operations.
#[derive(Debug, Error)]
pub enum S2agError {
    /// Non-retriable HTTP status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code returned by the server
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Bounded retry budget used up
    #[error("Retries exhausted after {attempts} attempts (last status: {status:?})")]
    RetriesExhausted {
        /// Last status seen, `None` when the last attempt failed in transport
        status: Option<u16>,
        /// Number of attempts made
        attempts: u32,
        /// Last response body or transport error message
        body: String,
    },

    /// Response arrived but did not have the documented shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Spreadsheet write error
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl S2agError {
    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            S2agError::Http { status, .. } => Some(*status),
            S2agError::RetriesExhausted { status, .. } => *status,
            _ => None,
        }
    }

    /// Raw body worth persisting for audit, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            S2agError::Http { body, .. } | S2agError::RetriesExhausted { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Result type alias using `S2agError`
pub type Result<T> = std::result::Result<T, S2agError>;
