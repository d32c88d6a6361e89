use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Permission denied, file vanished mid-read. Skipped and retried next refresh.
    #[error("Transient file error: {0}")]
    TransientFile(String),

    /// The front end produced no usable result for a translation unit.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Persisted state could not be read back; the index is rebuilt from scratch.
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Snapshot write failed; the previous snapshot stays authoritative.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Refresh cancelled")]
    Cancelled,

    #[error("Index not initialized")]
    NotInitialized,

    #[error("A refresh is already running")]
    Busy,

    #[error("Watcher error: {0}")]
    Watcher(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
