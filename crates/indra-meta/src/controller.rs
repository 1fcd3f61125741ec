//! Meta-controller tick and signal fan-out.

use crate::features::{FeatureBuilder, FeatureVector};
use crate::policy::Policy;
use indra_core::{Allocation, IndexSymbol, MetaGroup, Signal};
use indra_market::MarketSnapshot;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Portfolio-level Greeks aggregated over the open book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
}

/// Gating thresholds and fan-out budget.
#[derive(Debug, Clone)]
pub struct MetaControllerConfig {
    /// Primary symbol the feature vector is built from.
    pub primary_symbol: IndexSymbol,
    /// VIX percentile above which trading pauses.
    pub pause_vix_percentile: f64,
    /// |GEX| in billions above which trading pauses.
    pub pause_gex_abs: f64,
    /// |portfolio delta| (normalized) above which trading pauses.
    pub pause_portfolio_delta_abs: f64,
    pub max_total_positions: usize,
    pub max_per_group: usize,
}

impl Default for MetaControllerConfig {
    fn default() -> Self {
        Self {
            primary_symbol: IndexSymbol::Nifty,
            pause_vix_percentile: 0.95,
            pause_gex_abs: 5.0,
            pause_portfolio_delta_abs: 5.0,
            max_total_positions: 5,
            max_per_group: 2,
        }
    }
}

struct MetaState {
    allocation: Allocation,
    paused: bool,
    last_features: Option<FeatureVector>,
}

/// Periodic allocation refresh and per-tick signal fan-out.
pub struct MetaController {
    config: MetaControllerConfig,
    policy: Policy,
    builder: FeatureBuilder,
    state: RwLock<MetaState>,
}

impl MetaController {
    pub fn new(config: MetaControllerConfig, policy: Policy) -> Self {
        Self {
            config,
            policy,
            builder: FeatureBuilder::new(),
            state: RwLock::new(MetaState {
                allocation: Allocation::uniform(),
                paused: false,
                last_features: None,
            }),
        }
    }

    pub fn model_version(&self) -> &str {
        self.policy.version()
    }

    pub fn allocation(&self) -> Allocation {
        self.state.read().allocation.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    /// Feature vector from the last refresh, JSON-encoded for trade
    /// telemetry.
    pub fn features_snapshot(&self) -> Option<String> {
        self.state
            .read()
            .last_features
            .as_ref()
            .and_then(|f| serde_json::to_string(f.as_slice()).ok())
    }

    /// One meta tick: observe, extract features, infer, gate.
    ///
    /// Returns the refreshed allocation; `is_paused` reflects the gating
    /// verdict until the next tick.
    pub fn refresh(
        &self,
        snapshot: &MarketSnapshot,
        portfolio: PortfolioGreeks,
        now: chrono::DateTime<chrono_tz::Tz>,
    ) -> Allocation {
        let Some(primary) = snapshot.get(self.config.primary_symbol) else {
            warn!("primary symbol missing from snapshot, keeping previous allocation");
            return self.allocation();
        };

        self.builder.observe(primary);
        let features = self.builder.build(primary, portfolio, now);
        let raw = self.policy.infer(&features);
        let allocation = Allocation::from_raw(raw);

        let paused = self.gate(&features);
        {
            let mut state = self.state.write();
            state.allocation = allocation.clone();
            state.paused = paused;
            state.last_features = Some(features);
        }

        info!(
            weights = ?allocation.weights,
            paused,
            version = self.policy.version(),
            "allocation refreshed"
        );
        allocation
    }

    /// Regime gating: pause on extreme VIX percentile, dealer gamma, or
    /// portfolio directionality.
    fn gate(&self, features: &FeatureVector) -> bool {
        let vix_pct = features.get("vix_percentile").unwrap_or(0.5);
        let gex = features.get("gex_total").unwrap_or(0.0);
        let pdelta = features.get("portfolio_delta").unwrap_or(0.0);

        if vix_pct > self.config.pause_vix_percentile {
            warn!(vix_pct, "PAUSE: extreme volatility percentile");
            return true;
        }
        if gex.abs() > self.config.pause_gex_abs {
            warn!(gex, "PAUSE: extreme dealer gamma exposure");
            return true;
        }
        if pdelta.abs() > self.config.pause_portfolio_delta_abs {
            warn!(pdelta, "PAUSE: portfolio too directional");
            return true;
        }
        false
    }

    /// Rank and trim this tick's signals under the allocation budget.
    ///
    /// Score = strength x allocation[group] x confidence; at most five
    /// picks in total and two per meta-group, after accounting for what
    /// is already open.
    pub fn fan_out(
        &self,
        signals: Vec<Signal>,
        open_total: usize,
        open_per_group: &HashMap<MetaGroup, usize>,
    ) -> Vec<Signal> {
        if self.is_paused() {
            return Vec::new();
        }
        let allocation = self.allocation();

        let mut scored: Vec<(f64, Signal)> = signals
            .into_iter()
            .map(|s| {
                let group = MetaGroup::for_strategy(&s.strategy_id);
                let score = s.strength * allocation.weight(group) * s.confidence;
                (score, s)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let budget = self.config.max_total_positions.saturating_sub(open_total);
        let mut group_counts: HashMap<MetaGroup, usize> = open_per_group.clone();
        let mut picked = Vec::new();
        for (_score, signal) in scored {
            if picked.len() >= budget {
                break;
            }
            let group = MetaGroup::for_strategy(&signal.strategy_id);
            let count = group_counts.entry(group).or_insert(0);
            if *count >= self.config.max_per_group {
                continue;
            }
            *count += 1;
            picked.push(signal);
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::Asia::Kolkata;
    use indra_core::{Greeks, OptionRight, OrderSide, Price};
    use rust_decimal_macros::dec;

    fn controller() -> MetaController {
        MetaController::new(MetaControllerConfig::default(), Policy::uniform())
    }

    fn signal(strategy: &str, strength: f64, confidence: f64, strike: rust_decimal::Decimal) -> Signal {
        Signal {
            strategy_id: strategy.to_string(),
            symbol: IndexSymbol::Nifty,
            right: OptionRight::Call,
            strike: Price::new(strike),
            expiry: NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            side: OrderSide::Buy,
            entry_price: Price::new(dec!(80)),
            target: Price::new(dec!(104)),
            stop_loss: Price::new(dec!(64)),
            tp1: None,
            tp2: None,
            tp3: None,
            strength,
            confidence,
            greeks: Greeks::default(),
        }
    }

    #[test]
    fn test_fan_out_respects_total_budget() {
        let mc = controller();
        let signals: Vec<Signal> = (0..8)
            .map(|i| {
                signal(
                    "rsi_reversal",
                    60.0 + i as f64,
                    0.8,
                    rust_decimal::Decimal::from(26000 + i * 50),
                )
            })
            .collect();
        // Group cap (2) binds before the total budget for one group.
        let picked = mc.fan_out(signals, 0, &HashMap::new());
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_fan_out_two_per_group() {
        let mc = controller();
        let signals = vec![
            signal("rsi_reversal", 90.0, 0.9, dec!(26000)),
            signal("vwap_deviation", 85.0, 0.9, dec!(26050)),
            signal("bollinger_bounce", 80.0, 0.9, dec!(26100)),
            signal("pcr_reversal", 75.0, 0.9, dec!(26150)),
        ];
        let picked = mc.fan_out(signals, 0, &HashMap::new());
        // Three mean-reversion candidates collapse to two; PCR passes.
        assert_eq!(picked.len(), 3);
        let mr = picked
            .iter()
            .filter(|s| MetaGroup::for_strategy(&s.strategy_id) == MetaGroup::MeanReversion)
            .count();
        assert_eq!(mr, 2);
    }

    #[test]
    fn test_fan_out_accounts_for_open_positions() {
        let mc = controller();
        let signals = vec![
            signal("rsi_reversal", 90.0, 0.9, dec!(26000)),
            signal("pcr_reversal", 85.0, 0.9, dec!(26050)),
        ];
        let mut open = HashMap::new();
        open.insert(MetaGroup::MeanReversion, 2);
        let picked = mc.fan_out(signals, 4, &open);
        // One slot left in total, mean-reversion is full.
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].strategy_id, "pcr_reversal");
    }

    #[test]
    fn test_fan_out_ranks_by_score() {
        let mc = controller();
        let signals = vec![
            signal("rsi_reversal", 60.0, 0.9, dec!(26000)),
            signal("pcr_reversal", 95.0, 0.95, dec!(26050)),
        ];
        let picked = mc.fan_out(signals, 4, &HashMap::new());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].strategy_id, "pcr_reversal");
    }

    #[test]
    fn test_paused_controller_fans_out_nothing() {
        let mc = controller();
        mc.state.write().paused = true;
        let signals = vec![signal("rsi_reversal", 90.0, 0.9, dec!(26000))];
        assert!(mc.fan_out(signals, 0, &HashMap::new()).is_empty());
    }

    #[test]
    fn test_gate_thresholds() {
        let mc = controller();
        let mut f = FeatureVector::zeros();
        assert!(!mc.gate(&f));

        f.0[4] = 0.97; // vix percentile
        assert!(mc.gate(&f));
        f.0[4] = 0.5;

        f.0[11] = -6.0; // gex_total
        assert!(mc.gate(&f));
        f.0[11] = 0.0;

        f.0[32] = 5.5; // portfolio_delta
        assert!(mc.gate(&f));
    }

    #[test]
    fn test_refresh_with_uniform_policy() {
        let mc = controller();
        let snapshot = sample_market_snapshot();
        let now = Kolkata.with_ymd_and_hms(2026, 3, 24, 10, 0, 0).unwrap();
        let allocation = mc.refresh(&snapshot, PortfolioGreeks::default(), now);
        assert!((allocation.sum() - 1.0).abs() < 1e-6);
        assert!(!mc.is_paused());
        assert!(mc.features_snapshot().is_some());
    }

    fn sample_market_snapshot() -> MarketSnapshot {
        use indra_core::{OptionChain, OptionLeg, StrikePair};
        use std::collections::HashMap as StdHashMap;

        let mut chain = OptionChain::new(
            IndexSymbol::Nifty,
            NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            Price::new(dec!(26000)),
        );
        chain.strikes.insert(
            Price::new(dec!(26000)),
            StrikePair {
                call: Some(OptionLeg {
                    strike: Price::new(dec!(26000)),
                    right: OptionRight::Call,
                    instrument_key: "NSE_FO|NIFTY26MAR2026CE26000".into(),
                    last_price: Price::new(dec!(120)),
                    bid: Price::new(dec!(119)),
                    ask: Price::new(dec!(121)),
                    oi: 100_000,
                    oi_change: 0,
                    volume: 10_000,
                    iv: 15.0,
                    greeks: Greeks::default(),
                }),
                put: None,
            },
        );
        chain.recompute_totals();

        let mut symbols = StdHashMap::new();
        symbols.insert(
            IndexSymbol::Nifty,
            indra_market::SymbolSnapshot {
                symbol: IndexSymbol::Nifty,
                spot: Price::new(dec!(26000)),
                spot_captured_at: chrono::Utc::now(),
                atm_strike: Price::new(dec!(26000)),
                expiry: chain.expiry,
                chain,
                technicals: StdHashMap::new(),
                vix_proxy: 14.0,
                regime: indra_core::Regime::Normal,
                iv_rank: 0.5,
                pcr_volume: 1.0,
                captured_at: chrono::Utc::now(),
            },
        );
        MarketSnapshot::new(symbols)
    }
}
