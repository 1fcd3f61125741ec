//! Risk management.
//!
//! The risk manager sizes validated signals (confidence, strategy,
//! portfolio-at-risk, and regime multipliers over a 2% base risk),
//! gates new entries (daily-loss breaker, concurrency and leverage caps,
//! per-meta-group allocation limits, PAUSE directives), and decides
//! per-position exits (staged target, stop-loss, trailing stop, EOD,
//! risk-off). It observes positions through the order manager's book and
//! never mutates broker state.

pub mod breakers;
pub mod manager;
pub mod sizing;

pub use breakers::{Breaker, CircuitBreakers};
pub use manager::{RiskBlock, RiskConfig, RiskManager};
pub use sizing::{confidence_multiplier, strategy_multiplier, PositionSizer};
