//! Error types for indra-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQty(String),

    #[error("Invalid instrument key: {0}")]
    InvalidInstrumentKey(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Position integrity violation: {0}")]
    Integrity(String),

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
