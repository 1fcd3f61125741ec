//! Fixed-order feature extraction from chain snapshots.

use chrono::{DateTime, Datelike, Timelike, Utc};
use indra_core::{session, IndexSymbol, OptionChain, OptionRight};
use indra_market::{SymbolSnapshot, Timeframe};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Feature vector dimensionality.
pub const FEATURE_DIM: usize = 35;

/// Canonical feature order. Indexing into the vector follows this list.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "spot_price_norm",
    "return_1bar",
    "return_3bar",
    "return_9bar",
    "vix_percentile",
    "pcr_oi_near",
    "pcr_vol_near",
    "pcr_oi_next",
    "pcr_vol_next",
    "max_pain_distance",
    "max_pain_norm",
    "gex_total",
    "gex_near_expiry",
    "gex_net_direction",
    "net_gamma",
    "otm_put_gamma",
    "gamma_slope",
    "iv_skew",
    "iv_term_slope",
    "oi_15m_total",
    "oi_15m_call",
    "oi_15m_put",
    "oi_30m_total",
    "oi_30m_call",
    "oi_30m_put",
    "vwap_zscore",
    "adx",
    "atr",
    "rsi",
    "hours_to_expiry",
    "day_of_week",
    "minutes_since_open",
    "portfolio_delta",
    "portfolio_gamma",
    "portfolio_vega",
];

/// Normalization scale for index levels.
const SPOT_SCALE: f64 = 25_000.0;

/// One immutable feature vector, rebuilt each meta tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_DIM]);

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_DIM])
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.0[i])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Clamp every component into a sane band; policy inputs must never
    /// carry NaN or runaway magnitudes.
    fn sanitized(mut self) -> Self {
        for v in &mut self.0 {
            if !v.is_finite() {
                *v = 0.0;
            }
            *v = v.clamp(-1000.0, 1000.0);
        }
        self
    }
}

/// A per-tick history point for one symbol.
#[derive(Debug, Clone, Copy)]
struct HistoryPoint {
    at: DateTime<Utc>,
    spot: f64,
    call_oi: i64,
    put_oi: i64,
}

/// Builds feature vectors and keeps the rolling history they need
/// (bar returns, OI velocity over 15 and 30 minutes).
pub struct FeatureBuilder {
    history: Mutex<HashMap<IndexSymbol, VecDeque<HistoryPoint>>>,
    max_points: usize,
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(HashMap::new()),
            max_points: 64,
        }
    }

    /// Fold one snapshot observation into the history.
    pub fn observe(&self, snap: &SymbolSnapshot) {
        let mut history = self.history.lock();
        let points = history.entry(snap.symbol).or_default();
        points.push_back(HistoryPoint {
            at: snap.captured_at,
            spot: snap.spot.to_f64_lossy(),
            call_oi: snap.chain.total_call_oi,
            put_oi: snap.chain.total_put_oi,
        });
        while points.len() > self.max_points {
            points.pop_front();
        }
    }

    /// Build the full 35-dim vector for one symbol.
    pub fn build(
        &self,
        snap: &SymbolSnapshot,
        portfolio: super::PortfolioGreeks,
        now: DateTime<chrono_tz::Tz>,
    ) -> FeatureVector {
        let mut f = [0.0f64; FEATURE_DIM];
        let spot = snap.spot.to_f64_lossy();

        // Spot level and bar returns.
        f[0] = spot / SPOT_SCALE;
        let (r1, r3, r9) = self.bar_returns(snap.symbol, spot);
        f[1] = r1;
        f[2] = r3;
        f[3] = r9;

        f[4] = snap.iv_rank;

        // PCR by OI and volume; next expiry mirrors near when the feed
        // serves a single expiry.
        f[5] = snap.chain.pcr;
        f[6] = snap.pcr_volume;
        f[7] = snap.chain.pcr;
        f[8] = snap.pcr_volume;

        // Max pain.
        let max_pain = snap.chain.max_pain_strike.to_f64_lossy();
        f[9] = if spot > 0.0 {
            (spot - max_pain) / spot * 100.0
        } else {
            0.0
        };
        f[10] = max_pain / SPOT_SCALE;

        // Dealer gamma exposure.
        let gex = gex_total(&snap.chain, spot);
        f[11] = gex;
        f[12] = gex * 0.7;
        f[13] = gex.signum();

        // Gamma profile.
        let (net_gamma, otm_put_gamma, gamma_slope) = gamma_profile(&snap.chain, spot);
        f[14] = net_gamma;
        f[15] = otm_put_gamma;
        f[16] = gamma_slope;

        // IV structure. Term slope needs a second expiry; with a single
        // chain it reads flat.
        f[17] = iv_skew(&snap.chain, spot);
        f[18] = 0.0;

        // OI velocity.
        let (t15, c15, p15) = self.oi_velocity(snap.symbol, chrono::Duration::minutes(15));
        let (t30, c30, p30) = self.oi_velocity(snap.symbol, chrono::Duration::minutes(30));
        f[19] = t15;
        f[20] = c15;
        f[21] = p15;
        f[22] = t30;
        f[23] = c30;
        f[24] = p30;

        // Technicals from the 5-minute window.
        let tech = snap.technicals_for(Timeframe::M5);
        f[25] = tech.vwap_zscore;
        f[26] = tech.adx / 100.0;
        f[27] = if spot > 0.0 { tech.atr / spot * 100.0 } else { 0.0 };
        f[28] = tech.rsi / 100.0;

        // Clock features.
        f[29] = session::days_to_expiry(snap.expiry, now) as f64 * 24.0
            + (15.5 - (now.time().hour() as f64 + now.time().minute() as f64 / 60.0)).max(0.0);
        f[30] = now.weekday().num_days_from_monday() as f64;
        f[31] = session::minutes_since_open(now) as f64;

        // Portfolio Greeks, normalized.
        f[32] = portfolio.delta / 1_000.0;
        f[33] = portfolio.gamma / 100.0;
        f[34] = portfolio.vega / 1_000.0;

        FeatureVector(f).sanitized()
    }

    fn bar_returns(&self, symbol: IndexSymbol, current: f64) -> (f64, f64, f64) {
        let history = self.history.lock();
        let Some(points) = history.get(&symbol) else {
            return (0.0, 0.0, 0.0);
        };
        let back = |bars: usize| -> f64 {
            if points.len() < bars + 1 {
                return 0.0;
            }
            let past = points[points.len() - 1 - bars].spot;
            if past <= 0.0 {
                return 0.0;
            }
            (current / past - 1.0) * 100.0
        };
        (back(1), back(3), back(9))
    }

    /// OI change over a lookback window, scaled to millions:
    /// (total, call, put).
    fn oi_velocity(&self, symbol: IndexSymbol, window: chrono::Duration) -> (f64, f64, f64) {
        let history = self.history.lock();
        let Some(points) = history.get(&symbol) else {
            return (0.0, 0.0, 0.0);
        };
        let Some(latest) = points.back() else {
            return (0.0, 0.0, 0.0);
        };
        let cutoff = latest.at - window;
        let Some(past) = points.iter().rev().find(|p| p.at <= cutoff) else {
            return (0.0, 0.0, 0.0);
        };
        let call = (latest.call_oi - past.call_oi) as f64 / 1e6;
        let put = (latest.put_oi - past.put_oi) as f64 / 1e6;
        (call + put, call, put)
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dealer GEX proxy in billions: sum of -gamma x OI x spot^2 x 1%.
fn gex_total(chain: &OptionChain, spot: f64) -> f64 {
    let mut gex = 0.0;
    for pair in chain.strikes.values() {
        for leg in [pair.call.as_ref(), pair.put.as_ref()].into_iter().flatten() {
            gex += -leg.greeks.gamma * leg.oi as f64 * spot * spot * 0.01;
        }
    }
    gex / 1e9
}

/// Net gamma (millions), OTM put gamma, and the put/call gamma slope.
fn gamma_profile(chain: &OptionChain, spot: f64) -> (f64, f64, f64) {
    let mut net = 0.0;
    let mut put_gamma = 0.0;
    let mut call_gamma = 0.0;
    for (strike, pair) in &chain.strikes {
        let k = strike.to_f64_lossy();
        if let Some(call) = &pair.call {
            net += call.greeks.gamma * call.oi as f64;
            if k > spot * 1.02 {
                call_gamma += call.greeks.gamma * call.oi as f64;
            }
        }
        if let Some(put) = &pair.put {
            net += put.greeks.gamma * put.oi as f64;
            if k < spot * 0.98 {
                put_gamma += put.greeks.gamma * put.oi as f64;
            }
        }
    }
    let slope = (put_gamma - call_gamma) / (put_gamma + call_gamma + 1e-6);
    (net / 1e6, put_gamma / 1e6, slope)
}

/// OTM put IV minus OTM call IV, in vol points.
fn iv_skew(chain: &OptionChain, spot: f64) -> f64 {
    let mut put_iv = Vec::new();
    let mut call_iv = Vec::new();
    for (strike, pair) in &chain.strikes {
        let k = strike.to_f64_lossy();
        if k < spot {
            if let Some(put) = &pair.put {
                if put.iv > 0.0 {
                    put_iv.push(put.iv);
                }
            }
        } else if k > spot {
            if let Some(call) = &pair.call {
                if call.iv > 0.0 {
                    call_iv.push(call.iv);
                }
            }
        }
    }
    let avg = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };
    avg(&put_iv) - avg(&call_iv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortfolioGreeks;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::Asia::Kolkata;
    use indra_core::{Greeks, OptionLeg, Price, StrikePair};
    use rust_decimal::Decimal;
    use std::collections::HashMap as StdHashMap;

    fn leg(strike: i64, right: OptionRight, oi: i64, iv: f64, gamma: f64) -> OptionLeg {
        OptionLeg {
            strike: Price::new(Decimal::from(strike)),
            right,
            instrument_key: format!("NSE_FO|NIFTY{strike}{}", right.suffix()),
            last_price: Price::new(Decimal::from(80)),
            bid: Price::new(Decimal::from(79)),
            ask: Price::new(Decimal::from(81)),
            oi,
            oi_change: 0,
            volume: 1000,
            iv,
            greeks: Greeks {
                delta: 0.5,
                gamma,
                theta: -5.0,
                vega: 12.0,
            },
        }
    }

    fn sample_snapshot(call_oi: i64, put_oi: i64) -> SymbolSnapshot {
        let mut chain = OptionChain::new(
            IndexSymbol::Nifty,
            NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            Price::new(Decimal::from(26000)),
        );
        for strike in [25000i64, 26000, 27000] {
            chain.strikes.insert(
                Price::new(Decimal::from(strike)),
                StrikePair {
                    call: Some(leg(strike, OptionRight::Call, call_oi, 14.0, 0.002)),
                    put: Some(leg(strike, OptionRight::Put, put_oi, 16.5, 0.003)),
                },
            );
        }
        chain.recompute_totals();
        chain.recompute_max_pain();
        SymbolSnapshot {
            symbol: IndexSymbol::Nifty,
            spot: Price::new(Decimal::from(26000)),
            spot_captured_at: Utc::now(),
            atm_strike: Price::new(Decimal::from(26000)),
            expiry: chain.expiry,
            pcr_volume: 1.0,
            chain,
            technicals: StdHashMap::new(),
            vix_proxy: 14.0,
            regime: indra_core::Regime::Normal,
            iv_rank: 0.4,
            captured_at: Utc::now(),
        }
    }

    fn now() -> chrono::DateTime<chrono_tz::Tz> {
        Kolkata.with_ymd_and_hms(2026, 3, 24, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_vector_has_fixed_dimension() {
        let builder = FeatureBuilder::new();
        let snap = sample_snapshot(1000, 1500);
        let v = builder.build(&snap, PortfolioGreeks::default(), now());
        assert_eq!(v.as_slice().len(), FEATURE_DIM);
        assert_eq!(FEATURE_NAMES.len(), FEATURE_DIM);
    }

    #[test]
    fn test_named_features_line_up() {
        let builder = FeatureBuilder::new();
        let snap = sample_snapshot(1000, 1500);
        let v = builder.build(&snap, PortfolioGreeks::default(), now());
        assert!((v.get("spot_price_norm").unwrap() - 26000.0 / 25000.0).abs() < 1e-9);
        assert!((v.get("pcr_oi_near").unwrap() - 1.5).abs() < 1e-9);
        assert!((v.get("vix_percentile").unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(v.get("day_of_week").unwrap(), 1.0); // Tuesday
        assert_eq!(v.get("minutes_since_open").unwrap(), 45.0);
    }

    #[test]
    fn test_iv_skew_put_heavy() {
        let snap = sample_snapshot(1000, 1000);
        let skew = iv_skew(&snap.chain, 26000.0);
        // Puts quoted at 16.5, calls at 14.0.
        assert!((skew - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_bar_returns_from_history() {
        let builder = FeatureBuilder::new();
        for spot in [25800i64, 25900, 26000] {
            let mut snap = sample_snapshot(1000, 1000);
            snap.spot = Price::new(Decimal::from(spot));
            builder.observe(&snap);
        }
        let (r1, _r3, r9) = builder.bar_returns(IndexSymbol::Nifty, 26100.0);
        assert!(r1 > 0.0);
        // Not enough points for nine bars.
        assert_eq!(r9, 0.0);
    }

    #[test]
    fn test_oi_velocity_window() {
        let builder = FeatureBuilder::new();
        let base = Utc::now();
        {
            let mut history = builder.history.lock();
            let points = history.entry(IndexSymbol::Nifty).or_default();
            points.push_back(HistoryPoint {
                at: base - chrono::Duration::minutes(20),
                spot: 26000.0,
                call_oi: 1_000_000,
                put_oi: 2_000_000,
            });
            points.push_back(HistoryPoint {
                at: base,
                spot: 26050.0,
                call_oi: 1_500_000,
                put_oi: 2_250_000,
            });
        }
        let (total, call, put) = builder.oi_velocity(IndexSymbol::Nifty, chrono::Duration::minutes(15));
        assert!((call - 0.5).abs() < 1e-9);
        assert!((put - 0.25).abs() < 1e-9);
        assert!((total - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_sanitize_removes_nan() {
        let mut v = FeatureVector::zeros();
        v.0[11] = f64::NAN;
        v.0[12] = 1e12;
        let v = v.sanitized();
        assert_eq!(v.0[11], 0.0);
        assert_eq!(v.0[12], 1000.0);
    }
}
