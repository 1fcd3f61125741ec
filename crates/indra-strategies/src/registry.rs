//! Static strategy registration table.

use crate::strategies;
use indra_core::Signal;
use indra_market::MarketSnapshot;

/// A strategy body: pure, non-suspending, bounded wall time.
pub type StrategyFn = fn(&MarketSnapshot) -> Vec<Signal>;

/// Registration table built at compile time: (canonical_id, body).
pub static REGISTRY: &[(&str, StrategyFn)] = &[
    ("vwap_deviation", strategies::vwap_deviation),
    ("rsi_reversal", strategies::rsi_reversal),
    ("pcr_reversal", strategies::pcr_reversal),
    ("momentum_impulse", strategies::momentum_impulse),
    ("iv_rank_trading", strategies::iv_rank_trading),
];

/// Normalize a configured strategy name to its canonical token.
///
/// Trims, lowercases, strips separators and a trailing `strategy`
/// suffix, then maps known spellings; unrecognized names come back
/// squashed so lookups fail loudly rather than silently aliasing.
pub fn canonical_id(name: &str) -> String {
    let squashed: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let squashed = squashed.strip_suffix("strategy").unwrap_or(&squashed);

    for (canonical, _) in REGISTRY {
        if canonical.replace('_', "") == squashed {
            return canonical.to_string();
        }
    }
    squashed.to_string()
}

/// Look up a strategy body by any accepted spelling of its name.
pub fn resolve(name: &str) -> Option<(String, StrategyFn)> {
    let id = canonical_id(name);
    REGISTRY
        .iter()
        .find(|(canonical, _)| *canonical == id)
        .map(|(canonical, body)| (canonical.to_string(), *body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_aliases() {
        assert_eq!(canonical_id("RSIReversal"), "rsi_reversal");
        assert_eq!(canonical_id(" rsi_reversal "), "rsi_reversal");
        assert_eq!(canonical_id("VWAPDeviationStrategy"), "vwap_deviation");
        assert_eq!(canonical_id("PCR-Reversal"), "pcr_reversal");
    }

    #[test]
    fn test_unknown_names_squash_without_aliasing() {
        assert_eq!(canonical_id("MysteryAlpha"), "mysteryalpha");
        assert!(resolve("MysteryAlpha").is_none());
    }

    #[test]
    fn test_resolve_known_strategies() {
        for (name, _) in REGISTRY {
            let (id, _body) = resolve(name).unwrap();
            assert_eq!(&id, name);
        }
    }
}
