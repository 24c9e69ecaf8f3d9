use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Participant-set violation: wrong count, duplicates, or self-pairing.
    /// Terminal; the caller must not retry with a truncated set.
    #[error("Invalid conversation shape: {0}")]
    InvalidConversationShape(String),

    /// Message payload violates the content-kind invariant.
    #[error("Invalid message payload: {0}")]
    InvalidMessagePayload(String),

    /// Settings update rejected before merge.
    #[error("Invalid settings update: {0}")]
    InvalidSettingsUpdate(String),

    /// The acting principal does not own the record it tried to mutate.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
