//! Core domain types for the indra options trading engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `IndexSymbol`, `Instrument`: tradable index and option identities
//! - `Price`, `Qty`: precision-safe numeric types
//! - `OptionChain`, `OptionLeg`: per-snapshot chain data
//! - `Signal`, `Position`, `Trade`: the trading lifecycle
//! - `Allocation`, `MetaGroup`: meta-controller capital allocation
//! - trading-session and expiry calendar helpers (exchange timezone)

pub mod allocation;
pub mod chain;
pub mod decimal;
pub mod error;
pub mod instrument;
pub mod position;
pub mod session;
pub mod signal;

pub use allocation::{Allocation, MetaGroup, ALLOCATION_CAP, NUM_META_GROUPS};
pub use chain::{Greeks, Ohlc, OptionChain, OptionLeg, Quote, StrikePair};
pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use instrument::{
    normalize_response_key, IndexSymbol, Instrument, InstrumentKind, OptionRight,
};
pub use position::{
    ExitReason, MarketContext, Position, PositionStatus, Regime, Trade,
};
pub use session::{
    current_expiry, days_to_expiry, is_market_open_at, minutes_since_open, now_ist,
    ExpiryRule, EOD_EXIT, EXPIRY_ROLLOVER, MARKET_CLOSE, MARKET_OPEN,
};
pub use signal::{OrderSide, Signal};
