//! Error types for title storage and metadata-service fetches.

use thiserror::Error;

/// Item store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata-service request failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("metadata service returned HTTP {code}: {status_text}")]
    Status { code: u16, status_text: String },

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("stream read failure: {0}")]
    Stream(String),
}

impl From<ureq::Error> for FetchError {
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::Status(code, response) => Self::Status {
                code,
                status_text: response.status_text().to_string(),
            },
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
