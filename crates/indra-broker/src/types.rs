//! Wire DTOs for broker REST responses.
//!
//! Field names mirror the broker payloads; conversion into core domain
//! types happens in the market-data layer. Responses are wrapped in
//! `{"status": "...", "data": ...}` envelopes handled by the client.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One entry in the LTP quote map.
#[derive(Debug, Clone, Deserialize)]
pub struct LtpEntry {
    pub last_price: Decimal,
    #[serde(default)]
    pub instrument_token: Option<String>,
}

/// One entry in the OHLC quote map.
#[derive(Debug, Clone, Deserialize)]
pub struct OhlcEntry {
    pub last_price: Decimal,
    pub ohlc: OhlcValues,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OhlcValues {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Quoted market data for one option leg.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionMarketDataDto {
    #[serde(default)]
    pub ltp: f64,
    #[serde(default)]
    pub bid_price: f64,
    #[serde(default)]
    pub ask_price: f64,
    #[serde(default)]
    pub oi: f64,
    #[serde(default)]
    pub prev_oi: f64,
    #[serde(default)]
    pub volume: i64,
}

/// Quoted Greeks for one option leg.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionGreeksDto {
    #[serde(default)]
    pub iv: f64,
    #[serde(default)]
    pub delta: f64,
    #[serde(default)]
    pub gamma: f64,
    #[serde(default)]
    pub theta: f64,
    #[serde(default)]
    pub vega: f64,
}

/// One side (call or put) of a chain row.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionLegDto {
    pub instrument_key: String,
    pub market_data: OptionMarketDataDto,
    #[serde(default)]
    pub option_greeks: OptionGreeksDto,
}

/// One strike row of the raw option chain.
#[derive(Debug, Clone, Deserialize)]
pub struct RawChainEntry {
    pub strike_price: Decimal,
    #[serde(default)]
    pub call_options: Option<OptionLegDto>,
    #[serde(default)]
    pub put_options: Option<OptionLegDto>,
    #[serde(default)]
    pub underlying_spot_price: Option<Decimal>,
}

/// Intraday/historical candle: [ts, open, high, low, close, volume, oi].
#[derive(Debug, Clone, Deserialize)]
pub struct Candle(
    pub String,
    pub f64,
    pub f64,
    pub f64,
    pub f64,
    pub i64,
    #[serde(default)] pub i64,
);

/// Acknowledgement from order placement/modification/cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: String,
}

/// Full order state from the order book.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetails {
    pub order_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filled_quantity: i64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub instrument_token: Option<String>,
}

/// One broker-reported position.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerPosition {
    #[serde(default)]
    pub instrument_token: Option<String>,
    #[serde(default, alias = "tradingsymbol")]
    pub trading_symbol: String,
    pub quantity: i64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub product: String,
}

/// Funds and margin snapshot (equity segment).
#[derive(Debug, Clone, Deserialize)]
pub struct FundsData {
    #[serde(default)]
    pub available_margin: f64,
    #[serde(default)]
    pub used_margin: f64,
}

/// User profile, used as the startup connectivity probe.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub is_active: bool,
}
