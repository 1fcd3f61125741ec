//! Capital allocation across the nine strategy meta-groups.
//!
//! The meta-controller's policy emits a raw nine-dimensional weight vector;
//! `Allocation::from_raw` clamps each component to the 0.35 cap and
//! renormalizes iteratively until the capped vector sums to one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of strategy meta-groups.
pub const NUM_META_GROUPS: usize = 9;

/// Per-group allocation ceiling.
pub const ALLOCATION_CAP: f64 = 0.35;

/// Strategy meta-groups, in allocation-vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetaGroup {
    MlPrediction,
    GreeksDeltaNeutral,
    VolatilityTrading,
    MeanReversion,
    MomentumTrend,
    OiInstitutionalFlow,
    PcrSentiment,
    IntradayPatterns,
    ArbitrageSpreads,
}

impl MetaGroup {
    pub const ALL: [MetaGroup; NUM_META_GROUPS] = [
        MetaGroup::MlPrediction,
        MetaGroup::GreeksDeltaNeutral,
        MetaGroup::VolatilityTrading,
        MetaGroup::MeanReversion,
        MetaGroup::MomentumTrend,
        MetaGroup::OiInstitutionalFlow,
        MetaGroup::PcrSentiment,
        MetaGroup::IntradayPatterns,
        MetaGroup::ArbitrageSpreads,
    ];

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|g| g == self).unwrap_or(0)
    }

    /// Resolve a canonical strategy token to its meta-group.
    ///
    /// Matching is by normalized-name containment against the group's
    /// member strategies; unknown strategies default to mean reversion.
    pub fn for_strategy(strategy_id: &str) -> Self {
        let norm: String = strategy_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        for (group, members) in GROUP_MEMBERS {
            for member in *members {
                if norm.contains(member) {
                    return *group;
                }
            }
        }
        MetaGroup::MeanReversion
    }
}

impl fmt::Display for MetaGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MlPrediction => "ML_PREDICTION",
            Self::GreeksDeltaNeutral => "GREEKS_DELTA_NEUTRAL",
            Self::VolatilityTrading => "VOLATILITY_TRADING",
            Self::MeanReversion => "MEAN_REVERSION",
            Self::MomentumTrend => "MOMENTUM_TREND",
            Self::OiInstitutionalFlow => "OI_INSTITUTIONAL_FLOW",
            Self::PcrSentiment => "PCR_SENTIMENT",
            Self::IntradayPatterns => "INTRADAY_PATTERNS",
            Self::ArbitrageSpreads => "ARBITRAGE_SPREADS",
        };
        write!(f, "{name}")
    }
}

/// Normalized strategy tokens per group, in lookup order.
const GROUP_MEMBERS: &[(MetaGroup, &[&str])] = &[
    (MetaGroup::MlPrediction, &["quantumedge"]),
    (
        MetaGroup::GreeksDeltaNeutral,
        &["gammascalping", "deltahedging", "gammaharvesting"],
    ),
    (
        MetaGroup::VolatilityTrading,
        &["volatilityharvesting", "ivranktrading", "skewarbitrage", "vegascalping"],
    ),
    (
        MetaGroup::MeanReversion,
        &["vwapdeviation", "bollingerbounce", "rsireversal", "overboughtoversold"],
    ),
    (
        MetaGroup::MomentumTrend,
        &["momentumimpulse", "trendfollowing", "breakout"],
    ),
    (
        MetaGroup::OiInstitutionalFlow,
        &["oiaccumulation", "institutionalfootprint", "maxpainmagnet", "dealergammaexposure"],
    ),
    (
        MetaGroup::PcrSentiment,
        &["pcrreversal", "sentimentanalysis", "putcallflow"],
    ),
    (
        MetaGroup::IntradayPatterns,
        &["timeofdaypatterns", "openingrangebreakout", "marketprofilegapfill", "vwap"],
    ),
    (
        MetaGroup::ArbitrageSpreads,
        &["ironcondor", "butterflyspread", "calendarspread", "volatilitycapture"],
    ),
];

/// A normalized capital allocation across the nine meta-groups.
///
/// Components are non-negative, each at most `ALLOCATION_CAP`, summing to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub weights: [f64; NUM_META_GROUPS],
    pub computed_at: DateTime<Utc>,
}

impl Allocation {
    /// Uniform allocation (policy artifact missing or warming up).
    pub fn uniform() -> Self {
        Self {
            weights: [1.0 / NUM_META_GROUPS as f64; NUM_META_GROUPS],
            computed_at: Utc::now(),
        }
    }

    /// Build a valid allocation from a raw policy output.
    ///
    /// Convergence rule: clamp negatives to zero, then repeatedly cap
    /// components at 0.35 and renormalize the uncapped remainder to the
    /// residual mass. Each pass either caps a new component or reaches a
    /// fixed point, so at most nine passes run. A degenerate all-zero raw
    /// vector falls back to uniform.
    pub fn from_raw(raw: [f64; NUM_META_GROUPS]) -> Self {
        let mut w: [f64; NUM_META_GROUPS] = raw.map(|x| if x.is_finite() { x.max(0.0) } else { 0.0 });
        if w.iter().sum::<f64>() <= f64::EPSILON {
            return Self::uniform();
        }

        let mut capped = [false; NUM_META_GROUPS];
        for _ in 0..NUM_META_GROUPS {
            // Renormalize the uncapped components to the residual mass.
            let capped_mass: f64 = w
                .iter()
                .zip(capped.iter())
                .filter(|(_, &c)| c)
                .map(|(x, _)| *x)
                .sum();
            let free_mass: f64 = w
                .iter()
                .zip(capped.iter())
                .filter(|(_, &c)| !c)
                .map(|(x, _)| *x)
                .sum();
            let residual = 1.0 - capped_mass;
            if free_mass > f64::EPSILON {
                let scale = residual / free_mass;
                for (x, &c) in w.iter_mut().zip(capped.iter()) {
                    if !c {
                        *x *= scale;
                    }
                }
            }

            // Cap any component now above the ceiling.
            let mut newly_capped = false;
            for (x, c) in w.iter_mut().zip(capped.iter_mut()) {
                if !*c && *x > ALLOCATION_CAP {
                    *x = ALLOCATION_CAP;
                    *c = true;
                    newly_capped = true;
                }
            }
            if !newly_capped {
                break;
            }
        }

        Self {
            weights: w,
            computed_at: Utc::now(),
        }
    }

    pub fn weight(&self, group: MetaGroup) -> f64 {
        self.weights[group.index()]
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn max_component(&self) -> f64 {
        self.weights.iter().copied().fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_allocation() {
        let a = Allocation::uniform();
        assert!((a.sum() - 1.0).abs() < 1e-6);
        assert!(a.max_component() <= ALLOCATION_CAP + 1e-6);
    }

    #[test]
    fn test_cap_and_renormalize_converges() {
        // Scenario: one dominant component must end exactly at the cap.
        let raw = [0.5, 0.2, 0.1, 0.05, 0.05, 0.05, 0.03, 0.01, 0.01];
        let a = Allocation::from_raw(raw);
        assert!((a.sum() - 1.0).abs() < 1e-6, "sum={}", a.sum());
        assert!(a.max_component() <= ALLOCATION_CAP + 1e-6);
        assert!((a.weights[0] - ALLOCATION_CAP).abs() < 1e-9);
        // Remaining mass is redistributed proportionally.
        assert!((a.weights[1] / a.weights[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_multiple_components_capped() {
        let raw = [0.6, 0.6, 0.6, 0.05, 0.05, 0.05, 0.03, 0.01, 0.01];
        let a = Allocation::from_raw(raw);
        assert!((a.sum() - 1.0).abs() < 1e-6);
        assert!(a.max_component() <= ALLOCATION_CAP + 1e-6);
    }

    #[test]
    fn test_degenerate_raw_falls_back_to_uniform() {
        let a = Allocation::from_raw([0.0; NUM_META_GROUPS]);
        assert!((a.sum() - 1.0).abs() < 1e-6);
        let b = Allocation::from_raw([f64::NAN; NUM_META_GROUPS]);
        assert!((b.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_components_clamped() {
        let raw = [-0.5, 0.3, 0.3, 0.3, 0.3, 0.1, 0.1, 0.05, 0.05];
        let a = Allocation::from_raw(raw);
        assert!(a.weights[0].abs() < 1e-12);
        assert!((a.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_strategy_group_resolution() {
        assert_eq!(MetaGroup::for_strategy("quantum_edge"), MetaGroup::MlPrediction);
        assert_eq!(MetaGroup::for_strategy("RSIReversal"), MetaGroup::MeanReversion);
        assert_eq!(MetaGroup::for_strategy("pcr_reversal"), MetaGroup::PcrSentiment);
        assert_eq!(MetaGroup::for_strategy("iron_condor"), MetaGroup::ArbitrageSpreads);
        // Unknown strategies default to mean reversion.
        assert_eq!(MetaGroup::for_strategy("mystery"), MetaGroup::MeanReversion);
    }

    #[test]
    fn test_vwap_prefers_deviation_group() {
        // "vwap_deviation" must match the mean-reversion member before the
        // bare "vwap" token in intraday patterns.
        assert_eq!(MetaGroup::for_strategy("vwap_deviation"), MetaGroup::MeanReversion);
        assert_eq!(MetaGroup::for_strategy("vwap"), MetaGroup::IntradayPatterns);
    }
}
