//! Error types for the hybrid blob cache

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for cache operations
#[derive(Debug, Error)]
pub enum Error {
    /// An empty key, empty value, or missing file name where one is required
    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    /// The manifest database is in the capped-backoff window or has been
    /// permanently disabled after too many open failures
    #[error("cache database unavailable")]
    Unavailable,

    /// A File Store read/write/delete primitive failed
    #[error("I/O failure: {0}")]
    Io(String),

    /// A prepared-statement prepare/step returned a non-success code
    #[error(transparent)]
    Index(#[from] rusqlite::Error),

    /// A row referenced a blob file that could not be read; the row has
    /// already been deleted to repair the inconsistency
    #[error("blob file for key {0:?} could not be read; entry removed")]
    IntegrityLoss(String),

    /// The manifest could not be recovered at construction time
    #[error("failed to reset cache at {path}: {reason}")]
    ResetFailure { path: String, reason: String },

    /// The cache root path is too long to safely nest `data/` and `trash/` entries under it
    #[error("cache root path too long ({len} bytes, limit {limit})")]
    PathTooLong { len: usize, limit: usize },

    /// The façade's object codec (serde_json) failed to encode a value
    #[error("failed to encode cached object: {0}")]
    Codec(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
