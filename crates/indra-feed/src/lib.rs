//! Push-socket market data feed.
//!
//! One long-lived WebSocket per process:
//! - authorize via REST to obtain a single-use feed URL
//! - subscribe with `{guid, method: "sub", data: {mode, instrumentKeys}}`
//! - decode length-delimited binary frames into typed feed messages
//! - dispatch each message to callbacks registered per instrument, in
//!   arrival order per instrument (latest-wins coalescing under pressure)
//! - reconnect with exponential backoff and full resubscription
//!
//! State machine: INIT -> AUTH -> CONNECTING -> CONNECTED <-> DISCONNECTED
//! -> TERMINATED.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod wire;

pub use connection::{FeedConfig, FeedState, MarketFeed};
pub use dispatch::{FeedTick, TickCallback};
pub use error::{FeedError, FeedResult};
pub use wire::{Feed, FeedResponse, FullFeed, Ltpc, MarketFullFeed, OhlcWire, OptionGreeksWire};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
