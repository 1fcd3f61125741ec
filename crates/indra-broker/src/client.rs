//! Broker REST client.
//!
//! Synchronous from the caller's viewpoint (each method resolves to a
//! final result), asynchronous inside: pooled connections, keep-alive,
//! per-endpoint rate limiting, and bounded retries with exponential
//! backoff. 429 responses get an additional cooldown proportional to
//! `2^attempt`, capped at 30 seconds.

use crate::error::{BrokerError, BrokerResult};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    BrokerPosition, Candle, FundsData, LtpEntry, OhlcEntry, OrderAck, OrderDetails, ProfileData,
    RawChainEntry,
};
use chrono::NaiveDate;
use indra_core::{normalize_response_key, OrderSide, Price};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry budget per request.
const MAX_ATTEMPTS: u32 = 3;

/// Request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoints with independent rate-limit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ltp,
    Ohlc,
    OptionChain,
    OptionContract,
    Historical,
    OrderPlace,
    OrderModify,
    OrderCancel,
    OrderDetails,
    OrderBook,
    Positions,
    Funds,
    Profile,
    FeedAuthorize,
}

impl Endpoint {
    const ALL: [Endpoint; 14] = [
        Endpoint::Ltp,
        Endpoint::Ohlc,
        Endpoint::OptionChain,
        Endpoint::OptionContract,
        Endpoint::Historical,
        Endpoint::OrderPlace,
        Endpoint::OrderModify,
        Endpoint::OrderCancel,
        Endpoint::OrderDetails,
        Endpoint::OrderBook,
        Endpoint::Positions,
        Endpoint::Funds,
        Endpoint::Profile,
        Endpoint::FeedAuthorize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Ohlc => "ohlc",
            Self::OptionChain => "option_chain",
            Self::OptionContract => "option_contract",
            Self::Historical => "historical",
            Self::OrderPlace => "order_place",
            Self::OrderModify => "order_modify",
            Self::OrderCancel => "order_cancel",
            Self::OrderDetails => "order_details",
            Self::OrderBook => "order_book",
            Self::Positions => "positions",
            Self::Funds => "funds",
            Self::Profile => "profile",
            Self::FeedAuthorize => "feed_authorize",
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// API base, e.g. `https://api.upstox.com`.
    pub base_url: String,
    pub access_token: String,
    /// Per-endpoint budget: calls per second.
    pub max_calls_per_sec: usize,
}

impl BrokerConfig {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            max_calls_per_sec: 10,
        }
    }
}

/// REST facade over the broker API.
pub struct BrokerClient {
    http: Client,
    config: BrokerConfig,
    limiters: HashMap<Endpoint, RateLimiter>,
}

impl BrokerClient {
    /// Build a client with a pooled, keep-alive transport.
    pub fn new(config: BrokerConfig) -> BrokerResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| BrokerError::Permanent {
                endpoint: "client_init",
                detail: format!("failed to build HTTP client: {e}"),
            })?;

        let limiters = Endpoint::ALL
            .into_iter()
            .map(|ep| {
                (
                    ep,
                    RateLimiter::new(config.max_calls_per_sec, Duration::from_secs(1)),
                )
            })
            .collect();

        info!(base_url = %config.base_url, "broker client initialized");
        Ok(Self {
            http,
            config,
            limiters,
        })
    }

    // ===== Market data =====

    /// Last traded prices for a batch of instrument keys.
    ///
    /// Response keys may use `:` where the request used `|`; they are
    /// normalized back to pipe form here.
    pub async fn ltp(&self, instrument_keys: &[String]) -> BrokerResult<HashMap<String, Price>> {
        let symbol = instrument_keys.join(",");
        let data = self
            .request(
                Endpoint::Ltp,
                Method::GET,
                "/v2/market-quote/ltp",
                &[("symbol", symbol.as_str())],
                None,
            )
            .await?;
        let entries: HashMap<String, LtpEntry> = parse_data(Endpoint::Ltp, data)?;
        Ok(entries
            .into_iter()
            .map(|(k, v)| (normalize_response_key(&k), Price::new(v.last_price)))
            .collect())
    }

    /// OHLC quotes for a batch of instrument keys.
    pub async fn ohlc(&self, instrument_keys: &[String]) -> BrokerResult<HashMap<String, OhlcEntry>> {
        let symbol = instrument_keys.join(",");
        let data = self
            .request(
                Endpoint::Ohlc,
                Method::GET,
                "/v2/market-quote/ohlc",
                &[("symbol", symbol.as_str()), ("interval", "1d")],
                None,
            )
            .await?;
        let entries: HashMap<String, OhlcEntry> = parse_data(Endpoint::Ohlc, data)?;
        Ok(entries
            .into_iter()
            .map(|(k, v)| (normalize_response_key(&k), v))
            .collect())
    }

    /// Raw option chain for one underlying and expiry.
    pub async fn option_chain(
        &self,
        instrument_key: &str,
        expiry: NaiveDate,
    ) -> BrokerResult<Vec<RawChainEntry>> {
        let expiry_str = expiry.format("%Y-%m-%d").to_string();
        let data = self
            .request(
                Endpoint::OptionChain,
                Method::GET,
                "/v2/option/chain",
                &[
                    ("instrument_key", instrument_key),
                    ("expiry_date", expiry_str.as_str()),
                ],
                None,
            )
            .await?;
        parse_data(Endpoint::OptionChain, data)
    }

    /// Available contract expiries for one underlying, ascending.
    pub async fn option_contracts(
        &self,
        symbol: &str,
        instrument_key: &str,
    ) -> BrokerResult<Vec<NaiveDate>> {
        #[derive(Deserialize)]
        struct ContractDto {
            expiry: String,
        }
        let data = self
            .request(
                Endpoint::OptionContract,
                Method::GET,
                "/v2/option/contract",
                &[("symbol", symbol), ("instrument_key", instrument_key)],
                None,
            )
            .await?;
        let contracts: Vec<ContractDto> = parse_data(Endpoint::OptionContract, data)?;
        let mut expiries: Vec<NaiveDate> = contracts
            .iter()
            .filter_map(|c| NaiveDate::parse_from_str(&c.expiry, "%Y-%m-%d").ok())
            .collect();
        expiries.sort_unstable();
        expiries.dedup();
        Ok(expiries)
    }

    /// Intraday candles from the v3 API. `unit` is `minutes`/`hours`/`days`.
    pub async fn intraday_candles(
        &self,
        instrument_key: &str,
        unit: &str,
        interval: u32,
    ) -> BrokerResult<Vec<Candle>> {
        let path = format!("/v3/historical-candle/intraday/{instrument_key}/{unit}/{interval}");
        let data = self
            .request(Endpoint::Historical, Method::GET, &path, &[], None)
            .await?;
        parse_candles(data)
    }

    /// Daily historical candles over a date range.
    pub async fn historical_candles(
        &self,
        instrument_key: &str,
        interval: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> BrokerResult<Vec<Candle>> {
        let path = format!(
            "/v2/historical-candle/{instrument_key}/{interval}/{}/{}",
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d"),
        );
        let data = self
            .request(Endpoint::Historical, Method::GET, &path, &[], None)
            .await?;
        parse_candles(data)
    }

    // ===== Orders =====

    /// Place an order. `price` of zero means market.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        instrument_token: &str,
        quantity: i64,
        side: OrderSide,
        order_type: &str,
        price: Option<Price>,
        product: &str,
        validity: &str,
    ) -> BrokerResult<OrderAck> {
        let body = serde_json::json!({
            "quantity": quantity,
            "product": product,
            "validity": validity,
            "price": price.map(|p| p.inner()).unwrap_or_default(),
            "tag": "indra",
            "instrument_token": instrument_token,
            "order_type": order_type,
            "transaction_type": side.to_string(),
            "disclosed_quantity": 0,
            "trigger_price": 0,
            "is_amo": false,
        });
        let data = self
            .request(
                Endpoint::OrderPlace,
                Method::POST,
                "/v2/order/place",
                &[],
                Some(body),
            )
            .await?;
        parse_data(Endpoint::OrderPlace, data)
    }

    /// Modify price/quantity of a pending order.
    pub async fn modify_order(
        &self,
        order_id: &str,
        quantity: Option<i64>,
        price: Option<Price>,
    ) -> BrokerResult<OrderAck> {
        let mut body = serde_json::json!({ "order_id": order_id });
        if let Some(q) = quantity {
            body["quantity"] = q.into();
        }
        if let Some(p) = price {
            body["price"] = serde_json::json!(p.inner());
        }
        let data = self
            .request(
                Endpoint::OrderModify,
                Method::PUT,
                "/v2/order/modify",
                &[],
                Some(body),
            )
            .await?;
        parse_data(Endpoint::OrderModify, data)
    }

    /// Cancel a pending order.
    pub async fn cancel_order(&self, order_id: &str) -> BrokerResult<OrderAck> {
        let body = serde_json::json!({ "order_id": order_id });
        let data = self
            .request(
                Endpoint::OrderCancel,
                Method::DELETE,
                "/v2/order/cancel",
                &[],
                Some(body),
            )
            .await?;
        parse_data(Endpoint::OrderCancel, data)
    }

    /// Details for one order.
    pub async fn order_details(&self, order_id: &str) -> BrokerResult<OrderDetails> {
        let data = self
            .request(
                Endpoint::OrderDetails,
                Method::GET,
                "/v2/order/details",
                &[("order_id", order_id)],
                None,
            )
            .await?;
        parse_data(Endpoint::OrderDetails, data)
    }

    /// All orders for the day.
    pub async fn order_book(&self) -> BrokerResult<Vec<OrderDetails>> {
        let data = self
            .request(
                Endpoint::OrderBook,
                Method::GET,
                "/v2/order/retrieve-all",
                &[],
                None,
            )
            .await?;
        parse_data(Endpoint::OrderBook, data)
    }

    // ===== Portfolio & account =====

    /// Current short-term (intraday) positions.
    pub async fn positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let data = self
            .request(
                Endpoint::Positions,
                Method::GET,
                "/v2/portfolio/short-term-positions",
                &[],
                None,
            )
            .await?;
        parse_data(Endpoint::Positions, data)
    }

    /// Funds and margin for the equity segment.
    pub async fn funds(&self) -> BrokerResult<FundsData> {
        let data = self
            .request(
                Endpoint::Funds,
                Method::GET,
                "/v2/user/get-funds-and-margin",
                &[],
                None,
            )
            .await?;
        // The broker nests segments; equity is the one we trade.
        if let Some(equity) = data.get("equity") {
            return serde_json::from_value(equity.clone()).map_err(|e| BrokerError::Permanent {
                endpoint: Endpoint::Funds.name(),
                detail: format!("malformed funds payload: {e}"),
            });
        }
        parse_data(Endpoint::Funds, data)
    }

    /// User profile.
    pub async fn profile(&self) -> BrokerResult<ProfileData> {
        let data = self
            .request(
                Endpoint::Profile,
                Method::GET,
                "/v2/user/profile",
                &[],
                None,
            )
            .await?;
        parse_data(Endpoint::Profile, data)
    }

    /// One-shot feed URL for the push socket.
    pub async fn feed_authorize(&self) -> BrokerResult<String> {
        let data = self
            .request(
                Endpoint::FeedAuthorize,
                Method::GET,
                "/v3/feed/market-data-feed/authorize",
                &[],
                None,
            )
            .await?;
        data.get("authorized_redirect_uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrokerError::Permanent {
                endpoint: Endpoint::FeedAuthorize.name(),
                detail: "missing authorized_redirect_uri".to_string(),
            })
    }

    /// Startup connectivity probe: retries the profile endpoint a few times
    /// to ride out container/network warm-up.
    pub async fn test_connection(&self) -> bool {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.profile().await {
                Ok(profile) => {
                    info!(user = %profile.user_id, "broker API connection verified");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "broker connection probe failed");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
        false
    }

    // ===== Transport =====

    /// Issue one request with rate limiting, retries, and backoff, and
    /// unwrap the `{status, data}` envelope.
    async fn request(
        &self,
        endpoint: Endpoint,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> BrokerResult<Value> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut last_detail = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if let Some(limiter) = self.limiters.get(&endpoint) {
                limiter.acquire().await;
            }

            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.config.access_token)
                .header("Accept", "application/json");
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(b) = &body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let envelope: Value =
                            resp.json().await.map_err(|e| BrokerError::Permanent {
                                endpoint: endpoint.name(),
                                detail: format!("malformed response body: {e}"),
                            })?;
                        return unwrap_envelope(endpoint, envelope);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        // Extra cooldown proportional to 2^attempt, capped.
                        let cooldown = Duration::from_secs((5u64 << attempt).min(30));
                        warn!(
                            endpoint = endpoint.name(),
                            attempt,
                            cooldown_s = cooldown.as_secs(),
                            "rate limited by broker"
                        );
                        if attempt + 1 < MAX_ATTEMPTS {
                            sleep(cooldown).await;
                            continue;
                        }
                        return Err(BrokerError::RateLimited {
                            endpoint: endpoint.name(),
                            attempts: attempt + 1,
                        });
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        last_detail = format!("HTTP {status}: {text}");
                        debug!(endpoint = endpoint.name(), attempt, %status, "server error, retrying");
                        if attempt + 1 < MAX_ATTEMPTS {
                            sleep(Duration::from_secs(1u64 << attempt)).await;
                            continue;
                        }
                    } else {
                        // 4xx other than 429: auth/validation, never retried.
                        return Err(BrokerError::Permanent {
                            endpoint: endpoint.name(),
                            detail: format!("HTTP {status}: {text}"),
                        });
                    }
                }
                Err(e) if e.is_timeout() => {
                    last_detail = format!("timeout: {e}");
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(Duration::from_secs(1u64 << attempt)).await;
                        continue;
                    }
                }
                Err(e) if e.is_connect() => {
                    // DNS and connection failures get a longer ramp.
                    last_detail = format!("connect: {e}");
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(Duration::from_secs(3 + (1u64 << attempt))).await;
                        continue;
                    }
                }
                Err(e) => {
                    last_detail = format!("transport: {e}");
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(Duration::from_secs(1u64 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(BrokerError::Transient {
            endpoint: endpoint.name(),
            detail: last_detail,
        })
    }
}

/// Unwrap `{"status": "success", "data": ...}`.
fn unwrap_envelope(endpoint: Endpoint, envelope: Value) -> BrokerResult<Value> {
    let status = envelope.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "success" {
        return Err(BrokerError::Permanent {
            endpoint: endpoint.name(),
            detail: format!("broker status {status:?}"),
        });
    }
    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
}

fn parse_data<T: serde::de::DeserializeOwned>(endpoint: Endpoint, data: Value) -> BrokerResult<T> {
    serde_json::from_value(data).map_err(|e| BrokerError::Permanent {
        endpoint: endpoint.name(),
        detail: format!("malformed payload: {e}"),
    })
}

fn parse_candles(data: Value) -> BrokerResult<Vec<Candle>> {
    let candles = data.get("candles").cloned().unwrap_or(Value::Array(vec![]));
    parse_data(Endpoint::Historical, candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_unwrap_success() {
        let env = serde_json::json!({"status": "success", "data": {"k": 1}});
        let data = unwrap_envelope(Endpoint::Ltp, env).unwrap();
        assert_eq!(data["k"], 1);
    }

    #[test]
    fn test_envelope_unwrap_error_status() {
        let env = serde_json::json!({"status": "error", "errors": []});
        assert!(matches!(
            unwrap_envelope(Endpoint::Ltp, env),
            Err(BrokerError::Permanent { .. })
        ));
    }

    #[test]
    fn test_ltp_key_normalization_shape() {
        // Quote maps come back with `:` separators; the typed accessor
        // must hand callers pipe-form keys.
        let data = serde_json::json!({
            "NSE_FO:NIFTY26MAR2026CE26150": {"last_price": 80.35}
        });
        let entries: HashMap<String, LtpEntry> = serde_json::from_value(data).unwrap();
        let mapped: HashMap<String, Price> = entries
            .into_iter()
            .map(|(k, v)| (normalize_response_key(&k), Price::new(v.last_price)))
            .collect();
        assert!(mapped.contains_key("NSE_FO|NIFTY26MAR2026CE26150"));
    }

    #[test]
    fn test_429_cooldown_progression() {
        // min(5 * 2^attempt, 30): 5, 10, 20, 30, 30 ...
        let cooldowns: Vec<u64> = (0..5).map(|a| (5u64 << a).min(30)).collect();
        assert_eq!(cooldowns, vec![5, 10, 20, 30, 30]);
    }
}
