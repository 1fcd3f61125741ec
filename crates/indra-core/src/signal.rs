//! Trade signal types.

use crate::chain::Greeks;
use crate::decimal::Price;
use crate::instrument::{IndexSymbol, Instrument, OptionRight};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side. The engine is long-only in v1; `Sell` appears only on
/// exits and reconciliation kill orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A validated candidate trade produced by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Canonical strategy token (trimmed, lowercased, alias-resolved).
    pub strategy_id: String,
    pub symbol: IndexSymbol,
    pub right: OptionRight,
    pub strike: Price,
    pub expiry: NaiveDate,
    pub side: OrderSide,
    pub entry_price: Price,
    pub target: Price,
    pub stop_loss: Price,
    /// Staged profit targets; filled from defaults when the strategy
    /// supplies only `target`.
    pub tp1: Option<Price>,
    pub tp2: Option<Price>,
    pub tp3: Option<Price>,
    /// Signal strength in [0, 100].
    pub strength: f64,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Greeks of the referenced leg at decision time.
    pub greeks: Greeks,
}

impl Signal {
    /// The option leg this signal refers to.
    pub fn instrument(&self) -> Instrument {
        Instrument::option(self.symbol, self.strike, self.right, self.expiry)
    }

    /// Dedup identity within a single tick.
    pub fn leg_key(&self) -> (IndexSymbol, Price, OptionRight, NaiveDate) {
        (self.symbol, self.strike, self.right, self.expiry)
    }
}
