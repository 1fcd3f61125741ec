//! Quote and option-chain snapshot types.
//!
//! An `OptionChain` is a per-snapshot view of every leg around spot for one
//! symbol and expiry, with derived sentiment fields (PCR, max pain, OI
//! totals) recomputed after strike filtering.

use crate::decimal::Price;
use crate::instrument::{IndexSymbol, OptionRight};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single price observation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument_key: String,
    pub last_price: Price,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub volume: i64,
    pub captured_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(instrument_key: impl Into<String>, last_price: Price) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            last_price,
            bid: None,
            ask: None,
            volume: 0,
            captured_at: Utc::now(),
        }
    }

    /// Age of this quote in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.captured_at).num_milliseconds()
    }

    /// Bid-ask spread when both sides are quoted.
    pub fn spread(&self) -> Option<Price> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if a >= b => Some(a - b),
            _ => None,
        }
    }
}

/// OHLC bar for one instrument and interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: i64,
    pub ts: DateTime<Utc>,
}

/// Option Greeks, either broker-quoted or Black-Scholes derived.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// One option leg within a chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub strike: Price,
    pub right: OptionRight,
    pub instrument_key: String,
    pub last_price: Price,
    pub bid: Price,
    pub ask: Price,
    pub oi: i64,
    pub oi_change: i64,
    pub volume: i64,
    /// Quoted implied volatility in percent (e.g. 14.97).
    pub iv: f64,
    pub greeks: Greeks,
}

impl OptionLeg {
    /// Quoted mid when both sides are present, otherwise last.
    pub fn mid(&self) -> Price {
        if self.bid.is_positive() && self.ask.is_positive() {
            Price::new((self.bid.inner() + self.ask.inner()) / Decimal::TWO)
        } else {
            self.last_price
        }
    }
}

/// CALL/PUT pair at one strike. Either side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrikePair {
    pub call: Option<OptionLeg>,
    pub put: Option<OptionLeg>,
}

impl StrikePair {
    pub fn leg(&self, right: OptionRight) -> Option<&OptionLeg> {
        match right {
            OptionRight::Call => self.call.as_ref(),
            OptionRight::Put => self.put.as_ref(),
        }
    }
}

/// Option chain snapshot for one symbol and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: IndexSymbol,
    pub expiry: NaiveDate,
    pub spot_price: Price,
    /// Strikes in ascending order.
    pub strikes: BTreeMap<Price, StrikePair>,
    pub total_call_oi: i64,
    pub total_put_oi: i64,
    /// Put-call ratio by OI over the filtered strikes.
    pub pcr: f64,
    pub max_pain_strike: Price,
    pub captured_at: DateTime<Utc>,
}

impl OptionChain {
    pub fn new(symbol: IndexSymbol, expiry: NaiveDate, spot_price: Price) -> Self {
        Self {
            symbol,
            expiry,
            spot_price,
            strikes: BTreeMap::new(),
            total_call_oi: 0,
            total_put_oi: 0,
            pcr: 1.0,
            max_pain_strike: Price::ZERO,
            captured_at: Utc::now(),
        }
    }

    /// Age of this chain in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.captured_at).num_milliseconds()
    }

    /// Look up one leg by strike and right.
    pub fn leg(&self, strike: Price, right: OptionRight) -> Option<&OptionLeg> {
        self.strikes.get(&strike).and_then(|p| p.leg(right))
    }

    /// Whether the chain contains a quoted leg at (strike, right).
    pub fn has_leg(&self, strike: Price, right: OptionRight) -> bool {
        self.leg(strike, right).is_some()
    }

    /// Recompute OI totals and PCR from the current strike set.
    ///
    /// Call after any strike filtering so the derived fields reflect what
    /// strategies actually see. A zero call-OI total leaves PCR at the
    /// substitutable default of 1.0; the caller decides on fallback.
    pub fn recompute_totals(&mut self) {
        let mut call_oi = 0i64;
        let mut put_oi = 0i64;
        for pair in self.strikes.values() {
            if let Some(c) = &pair.call {
                call_oi += c.oi;
            }
            if let Some(p) = &pair.put {
                put_oi += p.oi;
            }
        }
        self.total_call_oi = call_oi;
        self.total_put_oi = put_oi;
        self.pcr = if call_oi > 0 {
            put_oi as f64 / call_oi as f64
        } else {
            1.0
        };
    }

    /// Recompute the max-pain strike: the candidate strike minimizing the
    /// aggregate intrinsic payout owed by option writers at expiry.
    pub fn recompute_max_pain(&mut self) {
        let mut best: Option<(Price, f64)> = None;
        for &candidate in self.strikes.keys() {
            let settle = candidate.to_f64_lossy();
            let mut pain = 0.0f64;
            for (&strike, pair) in &self.strikes {
                let k = strike.to_f64_lossy();
                if let Some(c) = &pair.call {
                    pain += c.oi as f64 * (settle - k).max(0.0);
                }
                if let Some(p) = &pair.put {
                    pain += p.oi as f64 * (k - settle).max(0.0);
                }
            }
            match best {
                Some((_, min_pain)) if pain >= min_pain => {}
                _ => best = Some((candidate, pain)),
            }
        }
        if let Some((strike, _)) = best {
            self.max_pain_strike = strike;
        }
    }

    /// Strike nearest to spot among the present strikes.
    pub fn atm_strike(&self) -> Option<Price> {
        let spot = self.spot_price.inner();
        self.strikes
            .keys()
            .min_by(|a, b| {
                let da = (a.inner() - spot).abs();
                let db = (b.inner() - spot).abs();
                da.cmp(&db)
            })
            .copied()
    }

    /// Average quoted IV across the ATM core (strikes within +/-2% of spot).
    pub fn atm_iv(&self) -> Option<f64> {
        let spot = self.spot_price.to_f64_lossy();
        if spot <= 0.0 {
            return None;
        }
        let mut sum = 0.0;
        let mut n = 0usize;
        for (strike, pair) in &self.strikes {
            let k = strike.to_f64_lossy();
            if (k - spot).abs() / spot > 0.02 {
                continue;
            }
            for leg in [pair.call.as_ref(), pair.put.as_ref()].into_iter().flatten() {
                if leg.iv > 0.0 {
                    sum += leg.iv;
                    n += 1;
                }
            }
        }
        (n > 0).then(|| sum / n as f64)
    }
}

/// PCR by traded volume over the chain's strikes.
pub fn pcr_by_volume(chain: &OptionChain) -> f64 {
    let mut call_vol = 0i64;
    let mut put_vol = 0i64;
    for pair in chain.strikes.values() {
        if let Some(c) = &pair.call {
            call_vol += c.volume;
        }
        if let Some(p) = &pair.put {
            put_vol += p.volume;
        }
    }
    if call_vol > 0 {
        put_vol as f64 / call_vol as f64
    } else {
        1.0
    }
}
