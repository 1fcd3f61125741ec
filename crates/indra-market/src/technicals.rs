//! Rolling candle windows and technical indicators.
//!
//! Per (symbol, timeframe) the manager maintains a bounded candle series
//! and derives RSI(14), MACD(12,26,9), Bollinger(20, 2sigma), ATR(14),
//! ADX(14), session VWAP (reset at the 09:15 IST open), a VWAP z-score,
//! and the annualized VIX proxy. All indicator math runs on f64; only
//! money amounts stay in `Decimal`.

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use indra_core::{session, Ohlc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Indicator timeframes tracked per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    H1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::M5, Timeframe::M15, Timeframe::H1];

    /// Candle span in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
        }
    }

    /// Bars per trading day (375-minute session).
    pub fn bars_per_day(&self) -> f64 {
        375.0 / self.minutes() as f64
    }

    /// Broker v3 intraday (unit, interval) pair.
    pub fn api_params(&self) -> (&'static str, u32) {
        match self {
            Self::M5 => ("minutes", 5),
            Self::M15 => ("minutes", 15),
            Self::H1 => ("hours", 1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::M5 => write!(f, "5m"),
            Self::M15 => write!(f, "15m"),
            Self::H1 => write!(f, "1h"),
        }
    }
}

/// Derived indicator values for one (symbol, timeframe).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub adx: f64,
    pub vwap: f64,
    pub vwap_zscore: f64,
    /// Annualized return stdev x 100.
    pub vix_proxy: f64,
}

/// Bounded rolling candle series with session VWAP accumulators.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    timeframe: Timeframe,
    candles: Vec<Ohlc>,
    max_len: usize,
    /// Session VWAP accumulators, reset at each market open.
    vwap_pv: f64,
    vwap_vol: f64,
    vwap_session: Option<chrono::NaiveDate>,
}

impl CandleSeries {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            candles: Vec::new(),
            max_len: 200,
            vwap_pv: 0.0,
            vwap_vol: 0.0,
            vwap_session: None,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close.to_f64_lossy())
    }

    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.ts)
    }

    /// Append or replace the bar at `candle.ts`.
    ///
    /// A new trading session (IST date change) resets the VWAP
    /// accumulators before the bar is folded in.
    pub fn push(&mut self, candle: Ohlc) {
        let session_date = candle.ts.with_timezone(&Kolkata).date_naive();
        if self.vwap_session != Some(session_date) {
            self.vwap_session = Some(session_date);
            self.vwap_pv = 0.0;
            self.vwap_vol = 0.0;
        }

        match self.candles.last() {
            Some(last) if last.ts == candle.ts => {
                // Replacing the forming bar: back out its VWAP contribution.
                let typical = typical_price(last);
                self.vwap_pv -= typical * last.volume as f64;
                self.vwap_vol -= last.volume as f64;
                *self.candles.last_mut().expect("non-empty") = candle;
            }
            _ => self.candles.push(candle),
        }

        let latest = self.candles.last().expect("just pushed");
        self.vwap_pv += typical_price(latest) * latest.volume as f64;
        self.vwap_vol += latest.volume as f64;

        if self.candles.len() > self.max_len {
            let excess = self.candles.len() - self.max_len;
            self.candles.drain(0..excess);
        }
    }

    /// Replace the whole series from a REST backfill, oldest first.
    pub fn replace(&mut self, candles: Vec<Ohlc>) {
        self.candles.clear();
        self.vwap_pv = 0.0;
        self.vwap_vol = 0.0;
        self.vwap_session = None;
        for c in candles {
            self.push(c);
        }
    }

    /// Session VWAP since the 09:15 open.
    pub fn session_vwap(&self) -> f64 {
        if self.vwap_vol <= 0.0 {
            return self.last_close().unwrap_or(0.0);
        }
        self.vwap_pv / self.vwap_vol
    }

    fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close.to_f64_lossy()).collect()
    }

    /// Compute the full indicator set for the current window.
    pub fn technicals(&self) -> TechnicalSnapshot {
        let closes = self.closes();
        let (macd, macd_signal, macd_histogram) = macd(&closes, 12, 26, 9);
        let (bb_upper, bb_middle, bb_lower) = bollinger(&closes, 20, 2.0);
        let vwap = self.session_vwap();
        TechnicalSnapshot {
            rsi: rsi(&closes, 14),
            macd,
            macd_signal,
            macd_histogram,
            bb_upper,
            bb_middle,
            bb_lower,
            atr: atr(&self.candles, 14),
            adx: adx(&self.candles, 14),
            vwap,
            vwap_zscore: vwap_zscore(&closes, vwap, 20),
            vix_proxy: vix_proxy(&closes, 20, self.timeframe.bars_per_day()),
        }
    }
}

fn typical_price(c: &Ohlc) -> f64 {
    (c.high.to_f64_lossy() + c.low.to_f64_lossy() + c.close.to_f64_lossy()) / 3.0
}

/// RSI with Wilder smoothing. Neutral 50 until enough bars exist.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return 50.0;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;
    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }
    if avg_loss <= f64::EPSILON {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// MACD line, signal line, histogram.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (f64, f64, f64) {
    if closes.len() < slow {
        return (0.0, 0.0, 0.0);
    }
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal);
    let m = *line.last().unwrap_or(&0.0);
    let s = *signal_line.last().unwrap_or(&0.0);
    (m, s, m - s)
}

/// Bollinger bands: (upper, middle, lower).
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> (f64, f64, f64) {
    if closes.len() < period {
        let last = closes.last().copied().unwrap_or(0.0);
        return (last, last, last);
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let var = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = var.sqrt();
    (mean + k * sd, mean, mean - k * sd)
}

/// ATR with Wilder smoothing.
pub fn atr(candles: &[Ohlc], period: usize) -> f64 {
    if candles.len() <= period {
        return 0.0;
    }
    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], &w[0]))
        .collect();
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    for &tr in &trs[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }
    atr
}

fn true_range(c: &Ohlc, prev: &Ohlc) -> f64 {
    let high = c.high.to_f64_lossy();
    let low = c.low.to_f64_lossy();
    let prev_close = prev.close.to_f64_lossy();
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// ADX(14): trend strength in [0, 100].
pub fn adx(candles: &[Ohlc], period: usize) -> f64 {
    if candles.len() < 2 * period + 1 {
        return 0.0;
    }
    let mut plus_dm = Vec::new();
    let mut minus_dm = Vec::new();
    let mut trs = Vec::new();
    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high.to_f64_lossy() - prev.high.to_f64_lossy();
        let down = prev.low.to_f64_lossy() - cur.low.to_f64_lossy();
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        trs.push(true_range(cur, prev));
    }

    let smooth = |xs: &[f64]| -> Vec<f64> {
        let mut out = Vec::with_capacity(xs.len());
        let mut acc = xs[..period].iter().sum::<f64>();
        out.push(acc);
        for &x in &xs[period..] {
            acc = acc - acc / period as f64 + x;
            out.push(acc);
        }
        out
    };

    let tr_s = smooth(&trs);
    let plus_s = smooth(&plus_dm);
    let minus_s = smooth(&minus_dm);

    let mut dxs = Vec::new();
    for i in 0..tr_s.len() {
        if tr_s[i] <= f64::EPSILON {
            dxs.push(0.0);
            continue;
        }
        let plus_di = 100.0 * plus_s[i] / tr_s[i];
        let minus_di = 100.0 * minus_s[i] / tr_s[i];
        let sum = plus_di + minus_di;
        dxs.push(if sum <= f64::EPSILON {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        });
    }
    if dxs.len() < period {
        return 0.0;
    }
    let mut adx = dxs[..period].iter().sum::<f64>() / period as f64;
    for &dx in &dxs[period..] {
        adx = (adx * (period as f64 - 1.0) + dx) / period as f64;
    }
    adx
}

/// Z-score of the latest close against session VWAP, scaled by the
/// rolling close stdev.
pub fn vwap_zscore(closes: &[f64], vwap: f64, window: usize) -> f64 {
    if closes.len() < window || vwap <= 0.0 {
        return 0.0;
    }
    let w = &closes[closes.len() - window..];
    let mean = w.iter().sum::<f64>() / window as f64;
    let sd = (w.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / window as f64).sqrt();
    if sd <= f64::EPSILON {
        return 0.0;
    }
    (closes[closes.len() - 1] - vwap) / sd
}

/// VIX proxy: stdev of the last `window` bar returns, annualized by
/// sqrt(252 x bars_per_day), in percent.
pub fn vix_proxy(closes: &[f64], window: usize, bars_per_day: f64) -> f64 {
    if closes.len() <= window {
        return 0.0;
    }
    let rets: Vec<f64> = closes[closes.len() - window - 1..]
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if rets.len() < 2 {
        return 0.0;
    }
    let mean = rets.iter().sum::<f64>() / rets.len() as f64;
    let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rets.len() as f64 - 1.0);
    var.sqrt() * (252.0 * bars_per_day).sqrt() * 100.0
}

/// Build an IST-session bar timestamp helper for tests and backfills.
pub fn session_bar_ts(date: chrono::NaiveDate, minutes_after_open: i64) -> DateTime<Utc> {
    use chrono::TimeZone;
    let naive = date.and_time(session::MARKET_OPEN) + chrono::Duration::minutes(minutes_after_open);
    Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
