//! Execution error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Broker error: {0}")]
    Broker(#[from] indra_broker::BrokerError),

    #[error("Order rejected by broker: {0}")]
    BrokerReject(String),

    #[error("Risk block: {0}")]
    RiskBlocked(String),

    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    #[error("Live trading disabled by configuration")]
    LiveTradingDisabled,

    #[error("Persistence error: {0}")]
    Persistence(#[from] indra_persistence::PersistenceError),

    #[error("Core error: {0}")]
    Core(#[from] indra_core::CoreError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
