//! Dynamic position sizing.
//!
//! Quantity = equity x risk% / entry price, where risk% starts at the
//! configured base (2%) and is scaled by confidence, strategy record,
//! current portfolio-at-risk, and volatility regime, capped at 4%.
//! Output is clamped to [1 lot, 6 lots] in lot multiples. Deterministic
//! for fixed inputs.

use indra_core::{Price, Qty, Regime, Signal};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::debug;

/// Hard ceiling on per-trade risk.
const MAX_RISK_PCT: f64 = 0.04;

const MIN_LOTS: i64 = 1;
const MAX_LOTS: i64 = 6;

/// Confidence bucket multiplier. The 0.95 boundary is inclusive on the
/// top bucket.
pub fn confidence_multiplier(confidence: f64) -> f64 {
    if confidence >= 0.95 {
        2.0
    } else if confidence >= 0.90 {
        1.5
    } else if confidence >= 0.85 {
        1.2
    } else if confidence >= 0.75 {
        1.0
    } else {
        0.8
    }
}

/// Multiplier for strategies with a strong live record.
pub fn strategy_multiplier(strategy_id: &str) -> f64 {
    match strategy_id {
        "quantum_edge" | "pcr_reversal" | "institutional_footprint" => 1.15,
        "gamma_scalping" => 1.10,
        "volatility_capture" => 1.05,
        _ => 1.0,
    }
}

/// Haircut applied as the book's at-risk share of equity grows.
pub fn portfolio_adjustment(at_risk: Decimal, equity: Decimal) -> f64 {
    if equity <= Decimal::ZERO {
        return 0.0;
    }
    let pct = (at_risk / equity).to_f64().unwrap_or(0.0);
    if pct > 0.08 {
        0.5
    } else if pct > 0.06 {
        0.7
    } else if pct > 0.04 {
        0.85
    } else {
        1.0
    }
}

/// Regime multiplier from the VIX bucket.
pub fn regime_adjustment(regime: Regime) -> f64 {
    match regime {
        Regime::HighVol => 0.8,
        Regime::LowVol => 1.2,
        Regime::Crisis => 0.5,
        Regime::Normal => 1.0,
    }
}

/// Signal-to-quantity sizing.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    /// Base per-trade risk fraction (0.02 = 2%).
    pub base_risk_pct: f64,
}

impl PositionSizer {
    pub fn new(base_risk_pct: f64) -> Self {
        Self { base_risk_pct }
    }

    /// Size one signal against current equity and the at-risk book.
    pub fn size(
        &self,
        signal: &Signal,
        equity: Decimal,
        at_risk: Decimal,
        regime: Regime,
        lot_size: i64,
    ) -> Qty {
        let risk_pct = (self.base_risk_pct
            * confidence_multiplier(signal.confidence)
            * strategy_multiplier(&signal.strategy_id)
            * portfolio_adjustment(at_risk, equity)
            * regime_adjustment(regime))
        .min(MAX_RISK_PCT);

        let risk_amount = equity * Decimal::from_f64(risk_pct).unwrap_or(Decimal::ZERO);
        let entry = signal.entry_price;
        if !entry.is_positive() || lot_size <= 0 {
            return Qty::ZERO;
        }

        let units = (risk_amount / entry.inner()).to_i64().unwrap_or(0);
        let clamped = units
            .max(MIN_LOTS * lot_size)
            .min(MAX_LOTS * lot_size);
        let qty = Qty::new(clamped).round_to_lot(lot_size);
        debug!(
            strategy = %signal.strategy_id,
            confidence = signal.confidence,
            risk_pct,
            qty = qty.units(),
            "sized signal"
        );
        qty
    }

    /// Rupee value the sized position would put at risk.
    pub fn position_value(qty: Qty, entry: Price) -> Decimal {
        qty.notional(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use indra_core::{Greeks, IndexSymbol, OptionRight, OrderSide};
    use rust_decimal_macros::dec;

    fn signal(confidence: f64, strategy: &str, entry: Decimal) -> Signal {
        Signal {
            strategy_id: strategy.to_string(),
            symbol: IndexSymbol::Nifty,
            right: OptionRight::Call,
            strike: Price::new(dec!(26100)),
            expiry: NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            side: OrderSide::Buy,
            entry_price: Price::new(entry),
            target: Price::new(entry * dec!(1.3)),
            stop_loss: Price::new(entry * dec!(0.8)),
            tp1: None,
            tp2: None,
            tp3: None,
            strength: 80.0,
            confidence,
            greeks: Greeks::default(),
        }
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(confidence_multiplier(0.70), 0.8);
        assert_eq!(confidence_multiplier(0.75), 1.0);
        assert_eq!(confidence_multiplier(0.85), 1.2);
        assert_eq!(confidence_multiplier(0.90), 1.5);
        assert_eq!(confidence_multiplier(0.94), 1.5);
        // Inclusive upper boundary: exactly 0.95 takes the 2.0x bucket.
        assert_eq!(confidence_multiplier(0.95), 2.0);
        assert_eq!(confidence_multiplier(0.99), 2.0);
    }

    #[test]
    fn test_portfolio_haircuts() {
        let equity = dec!(1000000);
        assert_eq!(portfolio_adjustment(dec!(90000), equity), 0.5);
        assert_eq!(portfolio_adjustment(dec!(70000), equity), 0.7);
        assert_eq!(portfolio_adjustment(dec!(50000), equity), 0.85);
        assert_eq!(portfolio_adjustment(dec!(10000), equity), 1.0);
    }

    #[test]
    fn test_sizing_is_deterministic() {
        let sizer = PositionSizer::new(0.02);
        let sig = signal(0.87, "rsi_reversal", dec!(80.00));
        let a = sizer.size(&sig, dec!(1000000), dec!(0), Regime::Normal, 75);
        let b = sizer.size(&sig, dec!(1000000), dec!(0), Regime::Normal, 75);
        assert_eq!(a, b);
        assert!(a.is_lot_multiple(75));
    }

    #[test]
    fn test_sizing_scales_with_confidence() {
        let sizer = PositionSizer::new(0.02);
        let low = sizer.size(
            &signal(0.70, "rsi_reversal", dec!(80.00)),
            dec!(1000000),
            dec!(0),
            Regime::Normal,
            75,
        );
        let high = sizer.size(
            &signal(0.95, "rsi_reversal", dec!(80.00)),
            dec!(1000000),
            dec!(0),
            Regime::Normal,
            75,
        );
        assert!(high > low);
    }

    #[test]
    fn test_sizing_clamps_to_lot_bounds() {
        let sizer = PositionSizer::new(0.02);
        // Tiny equity still buys one lot.
        let floor = sizer.size(
            &signal(0.80, "rsi_reversal", dec!(80.00)),
            dec!(10000),
            dec!(0),
            Regime::Normal,
            75,
        );
        assert_eq!(floor, Qty::new(75));
        // Huge equity is capped at six lots.
        let ceiling = sizer.size(
            &signal(0.99, "quantum_edge", dec!(80.00)),
            dec!(100000000),
            dec!(0),
            Regime::Normal,
            75,
        );
        assert_eq!(ceiling, Qty::new(450));
    }

    #[test]
    fn test_risk_pct_cap() {
        // 2% x 2.0 x 1.15 x 1.2 would be 5.5%; the cap holds it at 4%.
        let sizer = PositionSizer::new(0.02);
        let sig = signal(0.99, "quantum_edge", dec!(100.00));
        let qty = sizer.size(&sig, dec!(1000000), dec!(0), Regime::LowVol, 75);
        // 4% of 1,000,000 = 40,000 / 100 = 400 units -> 375 (5 lots).
        assert_eq!(qty, Qty::new(375));
    }

    #[test]
    fn test_zero_entry_sizes_zero() {
        let sizer = PositionSizer::new(0.02);
        let sig = signal(0.80, "rsi_reversal", dec!(0));
        assert_eq!(
            sizer.size(&sig, dec!(1000000), dec!(0), Regime::Normal, 75),
            Qty::ZERO
        );
    }
}
