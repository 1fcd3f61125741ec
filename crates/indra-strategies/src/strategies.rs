//! Reference strategy bodies.
//!
//! One representative per meta-group family, all long-only: the signal
//! buys a CALL to express upside and a PUT to express downside. Bodies
//! read only the snapshot; entries price off the quoted leg mid.

use indra_core::{
    IndexSymbol, OptionLeg, OptionRight, OrderSide, Price, Regime, Signal,
};
use indra_market::{MarketSnapshot, SymbolSnapshot, Timeframe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DEFAULT_TARGET_PCT: Decimal = dec!(1.30);
const DEFAULT_STOP_PCT: Decimal = dec!(0.80);

/// Buy the ATM leg of `right` for a symbol, if the chain quotes it.
fn atm_signal(
    snap: &SymbolSnapshot,
    right: OptionRight,
    strategy_id: &str,
    strength: f64,
    confidence: f64,
) -> Option<Signal> {
    let strike = snap.chain.atm_strike()?;
    let leg: &OptionLeg = snap.chain.leg(strike, right)?;
    let entry = leg.mid();
    if !entry.is_positive() {
        return None;
    }
    Some(Signal {
        strategy_id: strategy_id.to_string(),
        symbol: snap.symbol,
        right,
        strike,
        expiry: snap.chain.expiry,
        side: OrderSide::Buy,
        entry_price: entry,
        target: Price::new(entry.inner() * DEFAULT_TARGET_PCT),
        stop_loss: Price::new(entry.inner() * DEFAULT_STOP_PCT),
        tp1: None,
        tp2: None,
        tp3: None,
        strength: strength.clamp(0.0, 100.0),
        confidence: confidence.clamp(0.0, 1.0),
        greeks: leg.greeks,
    })
}

fn for_each_symbol(
    snapshot: &MarketSnapshot,
    mut body: impl FnMut(&SymbolSnapshot) -> Option<Signal>,
) -> Vec<Signal> {
    let mut out = Vec::new();
    for symbol in IndexSymbol::ALL {
        if let Some(snap) = snapshot.get(symbol) {
            if let Some(signal) = body(snap) {
                out.push(signal);
            }
        }
    }
    out
}

/// Mean reversion on the session VWAP z-score.
pub fn vwap_deviation(snapshot: &MarketSnapshot) -> Vec<Signal> {
    for_each_symbol(snapshot, |snap| {
        let tech = snap.technicals_for(Timeframe::M5);
        let z = tech.vwap_zscore;
        if z <= -1.5 {
            let strength = (60.0 + 10.0 * z.abs()).min(95.0);
            atm_signal(snap, OptionRight::Call, "vwap_deviation", strength, 0.78)
        } else if z >= 1.5 {
            let strength = (60.0 + 10.0 * z.abs()).min(95.0);
            atm_signal(snap, OptionRight::Put, "vwap_deviation", strength, 0.78)
        } else {
            None
        }
    })
}

/// RSI extremes on the 15-minute window.
pub fn rsi_reversal(snapshot: &MarketSnapshot) -> Vec<Signal> {
    for_each_symbol(snapshot, |snap| {
        let rsi = snap.technicals_for(Timeframe::M15).rsi;
        if rsi > 0.0 && rsi < 30.0 {
            atm_signal(snap, OptionRight::Call, "rsi_reversal", 85.0 - rsi, 0.82)
        } else if rsi > 70.0 {
            atm_signal(snap, OptionRight::Put, "rsi_reversal", rsi, 0.82)
        } else {
            None
        }
    })
}

/// Put-call ratio sentiment extremes.
pub fn pcr_reversal(snapshot: &MarketSnapshot) -> Vec<Signal> {
    for_each_symbol(snapshot, |snap| {
        let pcr = snap.chain.pcr;
        if pcr >= 1.3 {
            // Heavy put writing: crowd positioned short, fade it upward.
            let strength = (55.0 + 25.0 * (pcr - 1.3)).min(95.0);
            atm_signal(snap, OptionRight::Call, "pcr_reversal", strength, 0.86)
        } else if pcr > 0.0 && pcr <= 0.7 {
            let strength = (55.0 + 25.0 * (0.7 - pcr) / 0.7 * 10.0).min(95.0);
            atm_signal(snap, OptionRight::Put, "pcr_reversal", strength, 0.86)
        } else {
            None
        }
    })
}

/// MACD impulse confirmed by trend strength.
pub fn momentum_impulse(snapshot: &MarketSnapshot) -> Vec<Signal> {
    for_each_symbol(snapshot, |snap| {
        let tech = snap.technicals_for(Timeframe::M5);
        if tech.adx < 25.0 {
            return None;
        }
        if tech.macd_histogram > 0.0 && tech.macd > tech.macd_signal {
            atm_signal(snap, OptionRight::Call, "momentum_impulse", 70.0 + tech.adx.min(25.0), 0.80)
        } else if tech.macd_histogram < 0.0 && tech.macd < tech.macd_signal {
            atm_signal(snap, OptionRight::Put, "momentum_impulse", 70.0 + tech.adx.min(25.0), 0.80)
        } else {
            None
        }
    })
}

/// Cheap-premium entries when IV rank is depressed in a quiet regime.
pub fn iv_rank_trading(snapshot: &MarketSnapshot) -> Vec<Signal> {
    for_each_symbol(snapshot, |snap| {
        if snap.iv_rank > 0.2 || snap.regime == Regime::Crisis {
            return None;
        }
        let tech = snap.technicals_for(Timeframe::H1);
        let right = if tech.macd >= 0.0 {
            OptionRight::Call
        } else {
            OptionRight::Put
        };
        let strength = 60.0 + 100.0 * (0.2 - snap.iv_rank);
        atm_signal(snap, right, "iv_rank_trading", strength, 0.76)
    })
}
