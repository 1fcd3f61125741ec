//! Rate-limited REST facade for the broker API.
//!
//! `BrokerClient` wraps the broker's v2/v3 REST endpoints behind a pooled
//! HTTP client with per-endpoint sliding-window rate limiting, bounded
//! retries with exponential backoff, and a typed error taxonomy
//! (`Transient` / `RateLimited` / `Permanent`). Callers never see a raw
//! HTTP error; everything surfaces through `BrokerResult`.

pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod types;

pub use client::{BrokerClient, BrokerConfig, Endpoint};
pub use error::{BrokerError, BrokerResult};
pub use rate_limiter::RateLimiter;
pub use types::{
    BrokerPosition, Candle, FundsData, LtpEntry, OhlcEntry, OptionGreeksDto, OptionLegDto,
    OptionMarketDataDto, OrderAck, OrderDetails, ProfileData, RawChainEntry,
};
