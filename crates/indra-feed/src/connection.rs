//! Feed connection lifecycle.
//!
//! A single reader task owns the socket receive side. Reconnects use
//! exponential backoff (5, 10, 20, 40, 80 s; 5 attempts) and resubscribe
//! the full remembered instrument set. After the attempts are exhausted
//! the feed stays DISCONNECTED and consumers fall through to REST.

use crate::dispatch::{Dispatcher, FeedTick, TickCallback};
use crate::error::{FeedError, FeedResult};
use crate::wire::FeedResponse;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use indra_broker::{BrokerClient, BrokerError};
use indra_core::Price;
use parking_lot::{Mutex, RwLock};
use prost::Message as ProstMessage;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Feed connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Init,
    Auth,
    Connecting,
    Connected,
    Disconnected,
    Terminated,
}

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Client guid echoed in subscribe messages.
    pub guid: String,
    /// Subscription mode (`full` carries OHLC and Greeks).
    pub mode: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            guid: "indra".to_string(),
            mode: "full".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_secs: 5,
        }
    }
}

enum FeedCommand {
    Subscribe(Vec<String>),
}

/// Push-socket market feed. One instance per process.
pub struct MarketFeed {
    config: FeedConfig,
    state: Arc<RwLock<FeedState>>,
    dispatcher: Arc<Dispatcher>,
    /// Full remembered instrument set, resubscribed on reconnect.
    subscribed: Arc<Mutex<BTreeSet<String>>>,
    cmd_tx: Mutex<Option<mpsc::Sender<FeedCommand>>>,
    shutdown: CancellationToken,
}

impl MarketFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(FeedState::Init)),
            dispatcher: Arc::new(Dispatcher::new()),
            subscribed: Arc::new(Mutex::new(BTreeSet::new())),
            cmd_tx: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == FeedState::Connected
    }

    /// Register a tick callback for an instrument.
    pub fn register_callback(&self, instrument_key: &str, callback: TickCallback) {
        self.dispatcher.register(instrument_key, callback);
    }

    /// Remove all callbacks for an instrument.
    pub fn unregister_callback(&self, instrument_key: &str) {
        self.dispatcher.unregister(instrument_key);
    }

    /// Most recent price for an instrument, with arrival time.
    pub fn last_price(&self, instrument_key: &str) -> Option<(Price, DateTime<Utc>)> {
        self.dispatcher.last_price(instrument_key)
    }

    /// Most recent full tick for an instrument.
    pub fn last_tick(&self, instrument_key: &str) -> Option<FeedTick> {
        self.dispatcher.last_tick(instrument_key)
    }

    /// Subscribe instruments. While connected the keys go out on the live
    /// socket; while disconnected they are remembered and picked up by the
    /// next (re)connect.
    pub async fn subscribe(&self, instrument_keys: Vec<String>) {
        let fresh: Vec<String> = {
            let mut set = self.subscribed.lock();
            instrument_keys
                .into_iter()
                .filter(|k| set.insert(k.clone()))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }
        let tx = self.cmd_tx.lock().clone();
        if let Some(tx) = tx {
            if tx.send(FeedCommand::Subscribe(fresh.clone())).await.is_err() {
                debug!(count = fresh.len(), "feed offline, subscription queued");
            }
        } else {
            debug!(count = fresh.len(), "feed not started, subscription queued");
        }
    }

    /// Stop the reader and close the socket. Queued ticks are dropped.
    pub fn disconnect(&self) {
        *self.state.write() = FeedState::Terminated;
        self.shutdown.cancel();
        self.dispatcher.shutdown();
        info!("market feed disconnected");
    }

    /// Start the connection loop. Returns once the feed reaches a terminal
    /// condition: a fatal authorize rejection, exhausted reconnects, or
    /// shutdown. Spawn this on its own task.
    pub async fn run(self: Arc<Self>, broker: Arc<BrokerClient>) -> FeedResult<()> {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                *self.state.write() = FeedState::Terminated;
                return Ok(());
            }

            *self.state.write() = FeedState::Auth;
            let url = match broker.feed_authorize().await {
                Ok(url) => url,
                Err(e @ BrokerError::Permanent { .. }) => {
                    // Authorize 4xx is fatal: credentials are bad.
                    *self.state.write() = FeedState::Terminated;
                    error!(error = %e, "feed authorize rejected");
                    return Err(FeedError::AuthorizeFailed(e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "feed authorize failed, will retry");
                    if !self.backoff_or_give_up(&mut attempt).await {
                        return Err(FeedError::ReconnectExhausted { attempts: attempt });
                    }
                    continue;
                }
            };

            *self.state.write() = FeedState::Connecting;
            match self.run_session(&url).await {
                Ok(()) => {
                    // Clean shutdown requested.
                    *self.state.write() = FeedState::Terminated;
                    return Ok(());
                }
                Err(e) => {
                    *self.state.write() = FeedState::Disconnected;
                    warn!(error = %e, "feed session ended");
                    if !self.backoff_or_give_up(&mut attempt).await {
                        error!(
                            attempts = attempt,
                            "feed reconnect attempts exhausted, falling back to REST"
                        );
                        return Err(FeedError::ReconnectExhausted { attempts: attempt });
                    }
                }
            }
        }
    }

    /// Exponential backoff between attempts: base * 2^(n-1).
    /// Returns false once the attempt budget is spent.
    async fn backoff_or_give_up(&self, attempt: &mut u32) -> bool {
        *attempt += 1;
        if *attempt >= self.config.max_reconnect_attempts {
            return false;
        }
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = Duration::from_secs(self.config.reconnect_base_delay_secs << exponent);
        info!(attempt = *attempt, delay_s = delay.as_secs(), "feed reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }

    /// One connected session: subscribe everything remembered, then read
    /// frames until the transport fails or shutdown is requested.
    async fn run_session(&self, url: &str) -> FeedResult<()> {
        info!("connecting to market feed");
        let (ws, _response) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<FeedCommand>(32);
        *self.cmd_tx.lock() = Some(cmd_tx);
        *self.state.write() = FeedState::Connected;
        info!("market feed connected");

        // Let the connection settle before the subscribe burst.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let remembered: Vec<String> = self.subscribed.lock().iter().cloned().collect();
        if !remembered.is_empty() {
            self.send_subscribe(&mut write, &remembered).await?;
            info!(count = remembered.len(), "resubscribed remembered instruments");
        }

        let result = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(buf))) => {
                            match FeedResponse::decode(buf.as_slice()) {
                                Ok(frame) => self.dispatcher.on_frame(&frame),
                                Err(e) => warn!(error = %e, "undecodable feed frame dropped"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "closed by server".to_string()));
                            break Err(FeedError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                        None => {
                            break Err(FeedError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            })
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(FeedCommand::Subscribe(keys)) => {
                            self.send_subscribe(&mut write, &keys).await?;
                            info!(count = keys.len(), "subscribed instruments");
                        }
                        None => {
                            break Err(FeedError::ConnectionClosed {
                                code: 1006,
                                reason: "command channel closed".to_string(),
                            })
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
            }
        };

        *self.cmd_tx.lock() = None;
        result
    }

    async fn send_subscribe(
        &self,
        write: &mut futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            Message,
        >,
        keys: &[String],
    ) -> FeedResult<()> {
        let payload = serde_json::json!({
            "guid": self.config.guid,
            "method": "sub",
            "data": {
                "mode": self.config.mode,
                "instrumentKeys": keys,
            }
        });
        let bytes = serde_json::to_vec(&payload)?;
        write
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| FeedError::SubscribeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay_secs, 5);
        assert_eq!(config.mode, "full");
    }

    #[test]
    fn test_backoff_schedule() {
        // base * 2^(n-1): 5, 10, 20, 40, 80.
        let base = 5u64;
        let delays: Vec<u64> = (1..=5u32).map(|n| base << (n - 1).min(10)).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80]);
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_remembered() {
        let feed = MarketFeed::new(FeedConfig::default());
        feed.subscribe(vec!["NSE_INDEX|Nifty 50".to_string()]).await;
        feed.subscribe(vec![
            "NSE_INDEX|Nifty 50".to_string(),
            "BSE_INDEX|SENSEX".to_string(),
        ])
        .await;
        assert_eq!(feed.subscribed.lock().len(), 2);
        assert_eq!(feed.state(), FeedState::Init);
    }

    #[tokio::test]
    async fn test_disconnect_moves_to_terminated() {
        let feed = MarketFeed::new(FeedConfig::default());
        feed.disconnect();
        assert_eq!(feed.state(), FeedState::Terminated);
    }

    #[tokio::test]
    async fn test_session_subscribes_and_dispatches_frames() {
        use crate::wire::{Feed, FeedResponse, Ltpc};
        use futures_util::{SinkExt, StreamExt};
        use std::sync::atomic::{AtomicBool, Ordering};
        use tokio::net::TcpListener;
        use tokio_tungstenite::accept_async;

        // Local mock feed server: record the subscribe payload, then
        // stream one binary frame.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let got_subscribe = Arc::new(AtomicBool::new(false));
        let got_subscribe_srv = Arc::clone(&got_subscribe);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();

            while let Some(Ok(msg)) = read.next().await {
                if let Message::Binary(payload) = msg {
                    let parsed: serde_json::Value = serde_json::from_slice(&payload).unwrap();
                    if parsed["method"] == "sub" {
                        got_subscribe_srv.store(true, Ordering::SeqCst);
                        let mut frame = FeedResponse::default();
                        frame.feeds.insert(
                            "NSE_INDEX|Nifty 50".to_string(),
                            Feed {
                                ltpc: Some(Ltpc {
                                    ltp: 26132.45,
                                    ltt: 1,
                                    cp: 26100.0,
                                }),
                                full_feed: None,
                            },
                        );
                        write
                            .send(Message::Binary(frame.encode_to_vec()))
                            .await
                            .unwrap();
                    }
                }
            }
        });

        let feed = Arc::new(MarketFeed::new(FeedConfig::default()));
        feed.subscribe(vec!["NSE_INDEX|Nifty 50".to_string()]).await;

        let session = Arc::clone(&feed);
        let url = format!("ws://{addr}");
        let handle = tokio::spawn(async move { session.run_session(&url).await });

        // The session settles for a second before the subscribe burst.
        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(got_subscribe.load(Ordering::SeqCst));
        assert_eq!(feed.state(), FeedState::Connected);
        let (price, _at) = feed.last_price("NSE_INDEX|Nifty 50").expect("tick dispatched");
        assert_eq!(price, Price::from_f64_lossy(26132.45));

        feed.disconnect();
        let _ = handle.await;
    }
}
