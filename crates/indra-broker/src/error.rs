//! Error types for broker interactions.

use thiserror::Error;

/// Broker error taxonomy.
///
/// `Transient` errors may be retried by the caller; `RateLimited` carries
/// the cooldown already waited; `Permanent` means auth, validation, or a
/// malformed response and must not be retried.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker error on {endpoint}: {detail}")]
    Transient { endpoint: &'static str, detail: String },

    #[error("rate limited on {endpoint} after {attempts} attempts")]
    RateLimited { endpoint: &'static str, attempts: u32 },

    #[error("permanent broker error on {endpoint}: {detail}")]
    Permanent { endpoint: &'static str, detail: String },
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
