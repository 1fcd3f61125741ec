//! Market snapshot types handed to strategies.

use crate::technicals::{TechnicalSnapshot, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use indra_core::{IndexSymbol, OptionChain, Price, Regime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum spot age before a snapshot is stale.
pub const MAX_SPOT_AGE_MS: i64 = 5_000;

/// Maximum chain age before a snapshot is stale.
pub const MAX_CHAIN_AGE_MS: i64 = 10_000;

/// Regime bucket for an annualized VIX proxy (percent).
pub fn regime_for_vix(vix: f64) -> Regime {
    if vix > 28.0 {
        Regime::Crisis
    } else if vix > 20.0 {
        Regime::HighVol
    } else if vix > 0.0 && vix < 12.0 {
        Regime::LowVol
    } else {
        Regime::Normal
    }
}

/// Snapshot freshness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotHealth {
    Fresh,
    /// Stale snapshots must not drive order execution.
    Stale,
}

/// Per-symbol market state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: IndexSymbol,
    pub spot: Price,
    pub spot_captured_at: DateTime<Utc>,
    pub atm_strike: Price,
    pub expiry: NaiveDate,
    pub chain: OptionChain,
    pub technicals: HashMap<Timeframe, TechnicalSnapshot>,
    /// Annualized VIX proxy in percent (5-minute timeframe).
    pub vix_proxy: f64,
    pub regime: Regime,
    /// Current ATM IV percentile over the trailing year, [0, 1].
    pub iv_rank: f64,
    /// PCR by traded volume over the filtered chain.
    pub pcr_volume: f64,
    pub captured_at: DateTime<Utc>,
}

impl SymbolSnapshot {
    pub fn spot_age_ms(&self) -> i64 {
        (Utc::now() - self.spot_captured_at).num_milliseconds()
    }

    /// Stale when the spot or chain outlived its freshness contract.
    pub fn is_stale(&self) -> bool {
        self.spot_age_ms() > MAX_SPOT_AGE_MS || self.chain.age_ms() > MAX_CHAIN_AGE_MS
    }

    /// Technicals for one timeframe (defaults when the window is warming).
    pub fn technicals_for(&self, timeframe: Timeframe) -> TechnicalSnapshot {
        self.technicals.get(&timeframe).copied().unwrap_or_default()
    }
}

/// Cross-symbol snapshot delivered to the strategy runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbols: HashMap<IndexSymbol, SymbolSnapshot>,
    pub captured_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(symbols: HashMap<IndexSymbol, SymbolSnapshot>) -> Self {
        Self {
            symbols,
            captured_at: Utc::now(),
        }
    }

    pub fn get(&self, symbol: IndexSymbol) -> Option<&SymbolSnapshot> {
        self.symbols.get(&symbol)
    }

    /// Fresh only when every tracked symbol is present and fresh.
    pub fn health(&self) -> SnapshotHealth {
        if self.symbols.is_empty() || self.symbols.values().any(|s| s.is_stale()) {
            SnapshotHealth::Stale
        } else {
            SnapshotHealth::Fresh
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.health() == SnapshotHealth::Fresh
    }
}
