//! Strategy runner: invoke, validate, de-duplicate.

use crate::registry::{resolve, StrategyFn};
use dashmap::DashSet;
use indra_core::Signal;
use indra_market::MarketSnapshot;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Why a raw signal was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RejectReason {
    AbsentLeg,
    NonPositiveEntry,
}

impl RejectReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::AbsentLeg => "absent_leg",
            Self::NonPositiveEntry => "non_positive_entry",
        }
    }
}

/// Runs the enabled strategies against each snapshot and returns
/// validated, de-duplicated signals.
pub struct StrategyRunner {
    enabled: Vec<(String, StrategyFn)>,
    /// (strategy, reason) pairs already logged; validation noise is
    /// reported once per pair, then counted silently.
    logged_rejects: DashSet<(String, &'static str)>,
}

impl StrategyRunner {
    /// Build a runner from configured strategy names. Unknown names are
    /// reported and skipped.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut enabled = Vec::new();
        for name in names {
            match resolve(name) {
                Some((id, body)) => {
                    if enabled.iter().any(|(existing, _)| existing == &id) {
                        continue;
                    }
                    enabled.push((id, body));
                }
                None => warn!(name, "unknown strategy in config, skipping"),
            }
        }
        Self {
            enabled,
            logged_rejects: DashSet::new(),
        }
    }

    pub fn enabled_ids(&self) -> Vec<&str> {
        self.enabled.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// One tick: run every enabled strategy, validate and de-duplicate.
    pub fn run(&self, snapshot: &MarketSnapshot) -> Vec<Signal> {
        let mut validated: Vec<Signal> = Vec::new();
        for (id, body) in &self.enabled {
            for mut signal in body(snapshot) {
                signal.strategy_id = id.clone();
                match self.validate(snapshot, &signal) {
                    Ok(()) => validated.push(signal),
                    Err(reason) => self.note_reject(id, reason),
                }
            }
        }
        dedupe_keep_strongest(validated)
    }

    fn validate(&self, snapshot: &MarketSnapshot, signal: &Signal) -> Result<(), RejectReason> {
        if !signal.entry_price.is_positive() {
            return Err(RejectReason::NonPositiveEntry);
        }
        let present = snapshot
            .get(signal.symbol)
            .map(|s| s.chain.has_leg(signal.strike, signal.right))
            .unwrap_or(false);
        if !present {
            return Err(RejectReason::AbsentLeg);
        }
        Ok(())
    }

    fn note_reject(&self, strategy: &str, reason: RejectReason) {
        if self
            .logged_rejects
            .insert((strategy.to_string(), reason.as_str()))
        {
            warn!(strategy, reason = reason.as_str(), "signal rejected");
        } else {
            debug!(strategy, reason = reason.as_str(), "signal rejected");
        }
    }
}

/// Collapse same-leg signals within one tick, keeping the strongest.
fn dedupe_keep_strongest(signals: Vec<Signal>) -> Vec<Signal> {
    let mut best: HashMap<_, Signal> = HashMap::new();
    for signal in signals {
        match best.get(&signal.leg_key()) {
            Some(existing) if existing.strength >= signal.strength => {}
            _ => {
                best.insert(signal.leg_key(), signal);
            }
        }
    }
    let mut out: Vec<Signal> = best.into_values().collect();
    out.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    out
}
