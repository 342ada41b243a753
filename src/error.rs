//
// error.rs
// Pacs-Sync-rs
//
// Error kinds shared by the stores and the sync engine, plus the warning values produced by best-effort steps.
//
// Thales Matheus Mendonça Santos - October 2026

use thiserror::Error;

/// Failure classes of the synchronization layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Store unreachable or credentials rejected. Fatal to the whole call.
    #[error("connection error: {0}")]
    Connection(String),

    /// A single study or instance is missing or malformed. Skippable.
    #[error("data error: {0}")]
    Data(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal degradations. The payload still moves through the pipeline, but the caller gets to see what happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("result text has {chars} chars, only the first {capacity} were embedded")]
    CodecOverflow { chars: usize, capacity: usize },

    #[error("result embedding failed, payload sent unmodified: {0}")]
    EmbedFailed(String),

    #[error("anonymization failed, payload sent unmodified: {0}")]
    AnonymizeFailed(String),
}
