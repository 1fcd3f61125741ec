//! Engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup failure: {0}")]
    Startup(String),

    #[error("Broker error: {0}")]
    Broker(#[from] indra_broker::BrokerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] indra_persistence::PersistenceError),

    #[error("Policy error: {0}")]
    Policy(#[from] indra_meta::PolicyError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] indra_telemetry::TelemetryError),
}

pub type EngineResult<T> = Result<T, EngineError>;
