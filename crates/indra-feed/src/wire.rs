//! Binary wire format for feed frames.
//!
//! Frames are protobuf-encoded `FeedResponse` messages: a map from
//! instrument key to per-instrument feed data. Indices stream LTP-only
//! (`ltpc`); subscribed options stream the full feed with OHLC and
//! quoted Greeks. Messages are hand-written prost structs; there is no
//! build-time codegen.

use std::collections::HashMap;

/// Last traded price and time.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Ltpc {
    /// Last traded price.
    #[prost(double, tag = "1")]
    pub ltp: f64,
    /// Last traded time, epoch milliseconds.
    #[prost(int64, tag = "2")]
    pub ltt: i64,
    /// Previous close.
    #[prost(double, tag = "3")]
    pub cp: f64,
}

/// Intraday OHLC bar carried on the full feed.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct OhlcWire {
    #[prost(double, tag = "1")]
    pub open: f64,
    #[prost(double, tag = "2")]
    pub high: f64,
    #[prost(double, tag = "3")]
    pub low: f64,
    #[prost(double, tag = "4")]
    pub close: f64,
    #[prost(int64, tag = "5")]
    pub volume: i64,
    /// Bar start, epoch milliseconds.
    #[prost(int64, tag = "6")]
    pub ts: i64,
}

/// Quoted option Greeks carried on the full feed.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct OptionGreeksWire {
    #[prost(double, tag = "1")]
    pub delta: f64,
    #[prost(double, tag = "2")]
    pub gamma: f64,
    #[prost(double, tag = "3")]
    pub theta: f64,
    #[prost(double, tag = "4")]
    pub vega: f64,
    /// Implied volatility in percent.
    #[prost(double, tag = "5")]
    pub iv: f64,
}

/// Market data block of the full feed.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub ohlc: Option<OhlcWire>,
    #[prost(message, optional, tag = "3")]
    pub greeks: Option<OptionGreeksWire>,
    /// Average traded price.
    #[prost(double, tag = "4")]
    pub atp: f64,
    /// Volume traded today.
    #[prost(int64, tag = "5")]
    pub vtt: i64,
    /// Open interest.
    #[prost(double, tag = "6")]
    pub oi: f64,
}

/// Full-mode feed wrapper.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FullFeed {
    #[prost(message, optional, tag = "1")]
    pub market_ff: Option<MarketFullFeed>,
}

/// Per-instrument feed payload: LTP-only or full.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub full_feed: Option<FullFeed>,
}

impl Feed {
    /// LTP from whichever shape this feed carries.
    pub fn ltp(&self) -> Option<f64> {
        if let Some(ltpc) = &self.ltpc {
            return Some(ltpc.ltp);
        }
        self.full_feed
            .as_ref()
            .and_then(|ff| ff.market_ff.as_ref())
            .and_then(|m| m.ltpc.as_ref())
            .map(|l| l.ltp)
    }

    /// Last traded time in epoch milliseconds, if present.
    pub fn ltt(&self) -> Option<i64> {
        if let Some(ltpc) = &self.ltpc {
            return Some(ltpc.ltt);
        }
        self.full_feed
            .as_ref()
            .and_then(|ff| ff.market_ff.as_ref())
            .and_then(|m| m.ltpc.as_ref())
            .map(|l| l.ltt)
    }

    /// Quoted Greeks, full feed only.
    pub fn greeks(&self) -> Option<&OptionGreeksWire> {
        self.full_feed
            .as_ref()
            .and_then(|ff| ff.market_ff.as_ref())
            .and_then(|m| m.greeks.as_ref())
    }
}

/// Top-level feed frame: instrument key -> feed payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FeedResponse {
    #[prost(map = "string, message", tag = "1")]
    pub feeds: HashMap<String, Feed>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn full_feed_frame(key: &str, ltp: f64) -> Vec<u8> {
        let mut resp = FeedResponse::default();
        resp.feeds.insert(
            key.to_string(),
            Feed {
                ltpc: None,
                full_feed: Some(FullFeed {
                    market_ff: Some(MarketFullFeed {
                        ltpc: Some(Ltpc {
                            ltp,
                            ltt: 1_775_000_000_000,
                            cp: ltp - 1.0,
                        }),
                        ohlc: None,
                        greeks: Some(OptionGreeksWire {
                            delta: 0.55,
                            gamma: 0.02,
                            theta: -5.2,
                            vega: 12.5,
                            iv: 14.97,
                        }),
                        atp: ltp,
                        vtt: 50_000,
                        oi: 125_000.0,
                    }),
                }),
            },
        );
        resp.encode_to_vec()
    }

    #[test]
    fn test_decode_full_feed_frame() {
        let buf = full_feed_frame("NSE_FO|NIFTY26MAR2026CE26150", 83.40);
        let decoded = FeedResponse::decode(buf.as_slice()).unwrap();
        let feed = &decoded.feeds["NSE_FO|NIFTY26MAR2026CE26150"];
        assert_eq!(feed.ltp(), Some(83.40));
        assert!((feed.greeks().unwrap().iv - 14.97).abs() < 1e-9);
    }

    #[test]
    fn test_ltp_only_feed() {
        let feed = Feed {
            ltpc: Some(Ltpc {
                ltp: 26132.45,
                ltt: 1_775_000_000_000,
                cp: 26100.0,
            }),
            full_feed: None,
        };
        assert_eq!(feed.ltp(), Some(26132.45));
        assert!(feed.greeks().is_none());
    }

    #[test]
    fn test_empty_feed_has_no_price() {
        let feed = Feed::default();
        assert_eq!(feed.ltp(), None);
        assert_eq!(feed.ltt(), None);
    }
}
