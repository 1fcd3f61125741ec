//! Position and trade lifecycle types.
//!
//! A `Position` is created OPEN when an entry order fills, marked to market
//! on every tick, and becomes a `Trade` row when closed. The engine is
//! long-only in v1, so unrealized PnL is `(current - entry) x qty` for both
//! rights.

use crate::chain::Greeks;
use crate::decimal::{Price, Qty};
use crate::error::{CoreError, Result};
use crate::instrument::Instrument;
use crate::signal::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Volatility regime bucket derived from the VIX proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    LowVol,
    #[default]
    Normal,
    HighVol,
    Crisis,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowVol => write!(f, "LOW_VOL"),
            Self::Normal => write!(f, "NORMAL"),
            Self::HighVol => write!(f, "HIGH_VOL"),
            Self::Crisis => write!(f, "CRISIS"),
        }
    }
}

/// Market context captured at entry and exit for later analysis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketContext {
    pub spot: Price,
    /// Annualized VIX proxy in percent.
    pub vix: f64,
    pub regime: Regime,
    pub hour: u32,
    /// Monday = 0 .. Sunday = 6.
    pub day_of_week: u32,
    pub days_to_expiry: i64,
    pub iv: f64,
    pub greeks: Greeks,
    pub oi: i64,
    pub volume: i64,
    pub spread: Option<Price>,
}

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Cancelled,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Why a position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Tp3Hit,
    StopLossHit,
    TrailingSlHit,
    Eod,
    RiskOff,
    OrphanKill,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tp3Hit => write!(f, "TP3_HIT"),
            Self::StopLossHit => write!(f, "STOP_LOSS_HIT"),
            Self::TrailingSlHit => write!(f, "TRAILING_SL_HIT"),
            Self::Eod => write!(f, "EOD"),
            Self::RiskOff => write!(f, "RISK_OFF"),
            Self::OrphanKill => write!(f, "ORPHAN_KILL"),
            Self::Manual => write!(f, "MANUAL"),
        }
    }
}

/// An open (or just-closed) option position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub instrument: Instrument,
    /// Contract units; always positive (long-only).
    pub quantity: Qty,
    pub entry_price: Price,
    pub current_price: Price,
    pub entry_time: DateTime<Utc>,
    pub strategy_id: String,
    pub target: Price,
    pub stop_loss: Price,
    pub tp1: Price,
    pub tp2: Price,
    pub tp3: Price,
    /// Ratcheting stop; set once TP1 trades.
    pub trailing_sl: Option<Price>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub entry_greeks: Greeks,
    pub current_greeks: Greeks,
    pub entry_context: MarketContext,
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Price>,
    pub exit_context: Option<MarketContext>,
}

impl Position {
    /// Create a freshly filled OPEN position.
    ///
    /// Staged targets default to +10% / +20% / target when unset.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        instrument: Instrument,
        quantity: Qty,
        entry_price: Price,
        strategy_id: impl Into<String>,
        target: Price,
        stop_loss: Price,
        staged: (Option<Price>, Option<Price>, Option<Price>),
        entry_greeks: Greeks,
        entry_context: MarketContext,
    ) -> Self {
        let pct = |p: Decimal| Price::new(entry_price.inner() * p);
        let tp1 = staged.0.unwrap_or_else(|| pct(Decimal::new(110, 2)));
        let tp2 = staged.1.unwrap_or_else(|| pct(Decimal::new(120, 2)));
        let tp3 = staged.2.unwrap_or(target);
        Self {
            position_id: Uuid::new_v4().to_string(),
            instrument,
            quantity,
            entry_price,
            current_price: entry_price,
            entry_time: Utc::now(),
            strategy_id: strategy_id.into(),
            target,
            stop_loss,
            tp1,
            tp2,
            tp3,
            trailing_sl: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            entry_greeks,
            current_greeks: entry_greeks,
            entry_context,
            status: PositionStatus::Open,
            exit_reason: None,
            exit_time: None,
            exit_price: None,
            exit_context: None,
        }
    }

    /// Apply a tick: update current price, recompute MTM, ratchet the
    /// trailing stop. Idempotent for a repeated LTP.
    ///
    /// Long-only, so PnL is `(ltp - entry) x qty` regardless of right.
    pub fn apply_tick(&mut self, ltp: Price) {
        self.current_price = ltp;
        self.unrealized_pnl =
            (ltp.inner() - self.entry_price.inner()) * Decimal::from(self.quantity.units());

        // Trailing stop activates once TP1 trades and only ratchets up.
        if ltp >= self.tp1 {
            let floor = Price::new(ltp.inner() * Decimal::new(95, 2));
            self.trailing_sl = Some(match self.trailing_sl {
                Some(prev) if prev >= floor => prev,
                _ => floor,
            });
        }
    }

    /// Mark the position closed with final fill details.
    pub fn close(
        &mut self,
        exit_price: Price,
        reason: ExitReason,
        exit_context: MarketContext,
    ) {
        self.exit_price = Some(exit_price);
        self.exit_time = Some(Utc::now());
        self.exit_reason = Some(reason);
        self.exit_context = Some(exit_context);
        self.realized_pnl = (exit_price.inner() - self.entry_price.inner())
            * Decimal::from(self.quantity.units());
        self.unrealized_pnl = Decimal::ZERO;
        self.status = PositionStatus::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Entry notional in rupees.
    pub fn entry_value(&self) -> Decimal {
        self.quantity.notional(self.entry_price)
    }

    /// Validate the mandatory fields required to price and exit this
    /// position. Violations mean the row must be quarantined, not traded.
    pub fn check_integrity(&self) -> Result<()> {
        if !self.instrument.is_complete() {
            return Err(CoreError::Integrity(format!(
                "position {} has incomplete instrument {}",
                self.position_id, self.instrument.key
            )));
        }
        if !self.quantity.is_positive() {
            return Err(CoreError::Integrity(format!(
                "position {} has non-positive quantity {}",
                self.position_id, self.quantity
            )));
        }
        if !self.entry_price.is_positive() {
            return Err(CoreError::Integrity(format!(
                "position {} has non-positive entry price {}",
                self.position_id, self.entry_price
            )));
        }
        Ok(())
    }
}

/// A closed position, denormalized for the append-only trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: String,
    pub instrument_key: String,
    pub strategy_id: String,
    pub side: OrderSide,
    pub quantity: Qty,
    pub entry_price: Price,
    pub exit_price: Price,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub pnl: Decimal,
    pub pnl_percent: f64,
    pub entry_context: MarketContext,
    pub exit_context: MarketContext,
    /// Version of the policy artifact active at entry.
    pub model_version: String,
    /// JSON-encoded feature vector active at entry.
    pub features_snapshot: Option<String>,
}

impl Trade {
    /// Build a trade row from a closed position.
    ///
    /// Returns an integrity error if the position is not actually closed.
    pub fn from_closed(
        position: &Position,
        model_version: impl Into<String>,
        features_snapshot: Option<String>,
    ) -> Result<Self> {
        let (exit_price, exit_time, exit_reason, exit_context) = match (
            position.exit_price,
            position.exit_time,
            position.exit_reason,
            position.exit_context.clone(),
        ) {
            (Some(p), Some(t), Some(r), Some(c)) => (p, t, r, c),
            _ => {
                return Err(CoreError::Integrity(format!(
                    "position {} recorded as trade while not closed",
                    position.position_id
                )))
            }
        };
        let entry_value = position.entry_value();
        let pnl_percent = if entry_value.is_zero() {
            0.0
        } else {
            use rust_decimal::prelude::ToPrimitive;
            (position.realized_pnl / entry_value * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        };
        Ok(Self {
            position_id: position.position_id.clone(),
            instrument_key: position.instrument.key.clone(),
            strategy_id: position.strategy_id.clone(),
            side: OrderSide::Buy,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time,
            exit_reason,
            pnl: position.realized_pnl,
            pnl_percent,
            entry_context: position.entry_context.clone(),
            exit_context,
            model_version: model_version.into(),
            features_snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{IndexSymbol, OptionRight};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn nifty_call(strike: Decimal) -> Instrument {
        Instrument::option(
            IndexSymbol::Nifty,
            Price::new(strike),
            OptionRight::Call,
            NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
        )
    }

    fn open_position(entry: Decimal, qty: i64) -> Position {
        Position::open(
            nifty_call(dec!(26150)),
            Qty::new(qty),
            Price::new(entry),
            "rsi_reversal",
            Price::new(entry * dec!(1.3)),
            Price::new(entry * dec!(0.8)),
            (None, None, None),
            Greeks::default(),
            MarketContext::default(),
        )
    }

    #[test]
    fn test_mtm_formula() {
        // Scenario 1: entry 80.35, tick 83.40, qty 75 => +228.75.
        let mut pos = open_position(dec!(80.35), 75);
        pos.apply_tick(Price::new(dec!(83.40)));
        assert_eq!(pos.unrealized_pnl, dec!(228.75));
    }

    #[test]
    fn test_mtm_idempotent() {
        let mut pos = open_position(dec!(80.35), 75);
        pos.apply_tick(Price::new(dec!(83.40)));
        let snapshot = pos.clone();
        pos.apply_tick(Price::new(dec!(83.40)));
        assert_eq!(pos, snapshot);
    }

    #[test]
    fn test_mtm_same_formula_for_puts() {
        let mut pos = Position::open(
            Instrument::option(
                IndexSymbol::Nifty,
                Price::new(dec!(26300)),
                OptionRight::Put,
                NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            ),
            Qty::new(75),
            Price::new(dec!(69.45)),
            "pcr_reversal",
            Price::new(dec!(90)),
            Price::new(dec!(55)),
            (None, None, None),
            Greeks::default(),
            MarketContext::default(),
        );
        pos.apply_tick(Price::new(dec!(65.45)));
        assert_eq!(pos.unrealized_pnl, dec!(-300.00));
    }

    #[test]
    fn test_staged_target_defaults() {
        let pos = open_position(dec!(100), 75);
        assert_eq!(pos.tp1, Price::new(dec!(110.00)));
        assert_eq!(pos.tp2, Price::new(dec!(120.00)));
        assert_eq!(pos.tp3, pos.target);
    }

    #[test]
    fn test_trailing_ratchets_up_only() {
        let mut pos = open_position(dec!(100), 75);
        pos.apply_tick(Price::new(dec!(120)));
        assert_eq!(pos.trailing_sl, Some(Price::new(dec!(114.00))));
        // Price retreats but stays above TP1: trailing must not loosen.
        pos.apply_tick(Price::new(dec!(115)));
        assert_eq!(pos.trailing_sl, Some(Price::new(dec!(114.00))));
        pos.apply_tick(Price::new(dec!(130)));
        assert_eq!(pos.trailing_sl, Some(Price::new(dec!(123.50))));
    }

    #[test]
    fn test_close_realizes_pnl() {
        // Scenario 2: entry 50.70, exit 39.5, qty 75 => -840.
        let mut pos = open_position(dec!(50.70), 75);
        pos.close(
            Price::new(dec!(39.5)),
            ExitReason::StopLossHit,
            MarketContext::default(),
        );
        assert_eq!(pos.realized_pnl, dec!(-840.00));
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_integrity_check() {
        let mut pos = open_position(dec!(80), 75);
        assert!(pos.check_integrity().is_ok());
        pos.instrument.strike = None;
        assert!(pos.check_integrity().is_err());
    }

    #[test]
    fn test_trade_from_open_position_rejected() {
        let pos = open_position(dec!(80), 75);
        assert!(Trade::from_closed(&pos, "v1", None).is_err());
    }

    #[test]
    fn test_trade_pnl_percent() {
        let mut pos = open_position(dec!(100), 75);
        pos.close(
            Price::new(dec!(110)),
            ExitReason::Tp3Hit,
            MarketContext::default(),
        );
        let trade = Trade::from_closed(&pos, "uniform-v0", None).unwrap();
        assert_eq!(trade.pnl, dec!(750));
        assert!((trade.pnl_percent - 10.0).abs() < 1e-9);
    }
}
