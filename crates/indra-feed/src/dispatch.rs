//! Per-instrument tick dispatch.
//!
//! The reader task is the sole owner of the socket receive side; decoded
//! ticks are fanned out here. Each instrument gets its own watch channel
//! and dispatcher task, so callbacks for one instrument run serially in
//! arrival order while instruments dispatch in parallel. Watch channels
//! coalesce to the latest tick under backpressure, which is safe because
//! mark-to-market only needs the newest price.

use crate::wire::{Feed, FeedResponse};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indra_core::{Greeks, Price};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// A decoded tick for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedTick {
    pub instrument_key: String,
    pub ltp: Price,
    /// Last traded time, epoch milliseconds (0 when the feed omits it).
    pub ltt_ms: i64,
    pub greeks: Option<Greeks>,
    /// Quoted IV in percent, full feed only.
    pub iv: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl FeedTick {
    fn from_feed(key: &str, feed: &Feed) -> Option<Self> {
        let ltp = feed.ltp()?;
        let greeks = feed.greeks().map(|g| Greeks {
            delta: g.delta,
            gamma: g.gamma,
            theta: g.theta,
            vega: g.vega,
        });
        Some(Self {
            instrument_key: key.to_string(),
            ltp: Price::from_f64_lossy(ltp),
            ltt_ms: feed.ltt().unwrap_or(0),
            greeks,
            iv: feed.greeks().map(|g| g.iv),
            received_at: Utc::now(),
        })
    }
}

/// Callback invoked for every dispatched tick of a subscribed instrument.
pub type TickCallback = Arc<dyn Fn(&FeedTick) + Send + Sync>;

/// Fan-out of decoded frames to per-instrument callbacks.
pub struct Dispatcher {
    /// Latest tick per instrument, readable without a subscription.
    latest: DashMap<String, FeedTick>,
    /// Registered callbacks per instrument.
    callbacks: Arc<DashMap<String, Vec<TickCallback>>>,
    /// Per-instrument watch senders feeding the dispatcher tasks.
    channels: DashMap<String, watch::Sender<Option<FeedTick>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            latest: DashMap::new(),
            callbacks: Arc::new(DashMap::new()),
            channels: DashMap::new(),
        }
    }

    /// Register a callback for one instrument key.
    pub fn register(&self, instrument_key: &str, callback: TickCallback) {
        self.callbacks
            .entry(instrument_key.to_string())
            .or_default()
            .push(callback);
    }

    /// Drop all callbacks for one instrument key.
    pub fn unregister(&self, instrument_key: &str) {
        self.callbacks.remove(instrument_key);
    }

    /// Most recent tick for an instrument, if any arrived this session.
    pub fn last_tick(&self, instrument_key: &str) -> Option<FeedTick> {
        self.latest.get(instrument_key).map(|t| t.clone())
    }

    /// Most recent price with its arrival time.
    pub fn last_price(&self, instrument_key: &str) -> Option<(Price, DateTime<Utc>)> {
        self.latest
            .get(instrument_key)
            .map(|t| (t.ltp, t.received_at))
    }

    /// Route one decoded frame to the per-instrument channels.
    pub fn on_frame(&self, frame: &FeedResponse) {
        for (key, feed) in &frame.feeds {
            let Some(tick) = FeedTick::from_feed(key, feed) else {
                continue;
            };
            trace!(instrument = %key, ltp = %tick.ltp, "tick");
            self.latest.insert(key.clone(), tick.clone());
            let tx = self
                .channels
                .entry(key.clone())
                .or_insert_with(|| self.spawn_instrument_task());
            // A lagging dispatcher only ever skips to the newest tick.
            let _ = tx.send(Some(tick));
        }
    }

    /// Drop all channels, ending the dispatcher tasks. Queued (unconsumed)
    /// ticks are discarded; `latest` stays readable.
    pub fn shutdown(&self) {
        self.channels.clear();
    }

    fn spawn_instrument_task(&self) -> watch::Sender<Option<FeedTick>> {
        let (tx, mut rx) = watch::channel::<Option<FeedTick>>(None);
        let callbacks = Arc::clone(&self.callbacks);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let tick = rx.borrow_and_update().clone();
                let Some(tick) = tick else { continue };
                if let Some(cbs) = callbacks.get(&tick.instrument_key) {
                    for cb in cbs.iter() {
                        cb(&tick);
                    }
                }
            }
        });
        tx
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FullFeed, Ltpc, MarketFullFeed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn frame(key: &str, ltp: f64) -> FeedResponse {
        let mut resp = FeedResponse::default();
        resp.feeds.insert(
            key.to_string(),
            Feed {
                ltpc: Some(Ltpc { ltp, ltt: 1, cp: 0.0 }),
                full_feed: None,
            },
        );
        resp
    }

    #[tokio::test]
    async fn test_latest_tick_updates() {
        let d = Dispatcher::new();
        d.on_frame(&frame("NSE_INDEX|Nifty 50", 26100.0));
        d.on_frame(&frame("NSE_INDEX|Nifty 50", 26132.45));
        let (price, _) = d.last_price("NSE_INDEX|Nifty 50").unwrap();
        assert_eq!(price, Price::from_f64_lossy(26132.45));
    }

    #[tokio::test]
    async fn test_callbacks_receive_ticks() {
        let d = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        d.register(
            "NSE_FO|NIFTY26MAR2026CE26150",
            Arc::new(move |tick| {
                assert_eq!(tick.instrument_key, "NSE_FO|NIFTY26MAR2026CE26150");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        d.on_frame(&frame("NSE_FO|NIFTY26MAR2026CE26150", 83.40));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_full_feed_tick_carries_greeks() {
        let d = Dispatcher::new();
        let mut resp = FeedResponse::default();
        resp.feeds.insert(
            "NSE_FO|NIFTY26MAR2026CE26150".to_string(),
            Feed {
                ltpc: None,
                full_feed: Some(FullFeed {
                    market_ff: Some(MarketFullFeed {
                        ltpc: Some(Ltpc { ltp: 83.4, ltt: 2, cp: 80.0 }),
                        ohlc: None,
                        greeks: Some(crate::wire::OptionGreeksWire {
                            delta: 0.55,
                            gamma: 0.02,
                            theta: -5.2,
                            vega: 12.5,
                            iv: 14.97,
                        }),
                        atp: 82.0,
                        vtt: 1000,
                        oi: 125_000.0,
                    }),
                }),
            },
        );
        d.on_frame(&resp);
        let tick = d.last_tick("NSE_FO|NIFTY26MAR2026CE26150").unwrap();
        assert!((tick.greeks.unwrap().delta - 0.55).abs() < 1e-9);
        assert_eq!(tick.iv, Some(14.97));
    }

    #[tokio::test]
    async fn test_unregister_stops_callbacks() {
        let d = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        d.register(
            "k",
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        d.unregister("k");
        d.on_frame(&frame("k", 1.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
