//! Unified market data plane.
//!
//! `MarketDataManager` fuses the push feed, REST fallbacks, and the
//! two-tier cache into a per-tick `MarketSnapshot`: spot, the filtered
//! option chain with recomputed sentiment fields, multi-timeframe
//! technical indicators, a VIX proxy with regime bucketing, IV rank, and
//! Black-Scholes Greeks where the feed does not quote them. Snapshots
//! carry explicit freshness; stale data never reaches strategies.

pub mod error;
pub mod filter;
pub mod greeks;
pub mod iv_rank;
pub mod manager;
pub mod snapshot;
pub mod technicals;

pub use error::{MarketError, MarketResult};
pub use filter::filter_strikes;
pub use greeks::{black_scholes_greeks, bs_price};
pub use iv_rank::iv_rank_percentile;
pub use manager::{MarketDataManager, MarketDataConfig};
pub use snapshot::{MarketSnapshot, SnapshotHealth, SymbolSnapshot};
pub use technicals::{CandleSeries, TechnicalSnapshot, Timeframe};
