//! Market data errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Broker error: {0}")]
    Broker(#[from] indra_broker::BrokerError),

    #[error("No spot price available for {0}")]
    NoSpot(String),

    #[error("Empty option chain for {symbol} across {tried} expiries")]
    EmptyChain { symbol: String, tried: usize },

    #[error("Snapshot stale: {0}")]
    Stale(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] indra_persistence::PersistenceError),
}

pub type MarketResult<T> = Result<T, MarketError>;
