//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Row integrity violation for {position_id}: {reason}")]
    Integrity { position_id: String, reason: String },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
