//! Strike filtering around spot.
//!
//! Rules, applied per strike row:
//! - hard window: within +/-10% of spot
//! - ATM core (+/-2%): always kept
//! - outside the core: rows need combined OI >= 50 and volume >= 5,
//!   unless they sit within +/-5% of spot
//!
//! Derived chain fields must be recomputed after filtering.

use indra_core::OptionChain;

const HARD_WINDOW_PCT: f64 = 0.10;
const ATM_CORE_PCT: f64 = 0.02;
const LIQUIDITY_EXEMPT_PCT: f64 = 0.05;
const MIN_OI: i64 = 50;
const MIN_VOLUME: i64 = 5;

/// Filter a chain's strikes in place and refresh its derived fields.
pub fn filter_strikes(chain: &mut OptionChain) {
    let spot = chain.spot_price.to_f64_lossy();
    if spot <= 0.0 {
        return;
    }

    chain.strikes.retain(|strike, pair| {
        let k = strike.to_f64_lossy();
        let distance = (k - spot).abs() / spot;

        if distance > HARD_WINDOW_PCT {
            return false;
        }
        if distance <= ATM_CORE_PCT || distance <= LIQUIDITY_EXEMPT_PCT {
            return true;
        }

        let oi: i64 = pair.call.as_ref().map_or(0, |l| l.oi) + pair.put.as_ref().map_or(0, |l| l.oi);
        let volume: i64 =
            pair.call.as_ref().map_or(0, |l| l.volume) + pair.put.as_ref().map_or(0, |l| l.volume);
        oi >= MIN_OI && volume >= MIN_VOLUME
    });

    chain.recompute_totals();
    chain.recompute_max_pain();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use indra_core::{Greeks, IndexSymbol, OptionLeg, OptionRight, Price, StrikePair};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    fn leg(strike: f64, right: OptionRight, oi: i64, volume: i64) -> OptionLeg {
        let p = |v: f64| Price::new(Decimal::from_f64(v).unwrap());
        OptionLeg {
            strike: p(strike),
            right,
            instrument_key: format!("NSE_FO|NIFTY{strike}{}", right.suffix()),
            last_price: p(50.0),
            bid: p(49.5),
            ask: p(50.5),
            oi,
            oi_change: 0,
            volume,
            iv: 15.0,
            greeks: Greeks::default(),
        }
    }

    fn chain_with(strikes: &[(f64, i64, i64)]) -> OptionChain {
        let mut chain = OptionChain::new(
            IndexSymbol::Nifty,
            NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            Price::new(Decimal::from(26000)),
        );
        for &(k, oi, volume) in strikes {
            chain.strikes.insert(
                Price::new(Decimal::from_f64(k).unwrap()),
                StrikePair {
                    call: Some(leg(k, OptionRight::Call, oi, volume)),
                    put: Some(leg(k, OptionRight::Put, oi, volume)),
                },
            );
        }
        chain
    }

    fn has_strike(chain: &OptionChain, k: f64) -> bool {
        chain
            .strikes
            .contains_key(&Price::new(Decimal::from_f64(k).unwrap()))
    }

    #[test]
    fn test_hard_window_cuts_far_strikes() {
        // Spot 26000: +/-10% window is [23400, 28600].
        let mut chain = chain_with(&[(23000.0, 1000, 100), (26000.0, 1000, 100), (29000.0, 1000, 100)]);
        filter_strikes(&mut chain);
        assert!(!has_strike(&chain, 23000.0));
        assert!(has_strike(&chain, 26000.0));
        assert!(!has_strike(&chain, 29000.0));
    }

    #[test]
    fn test_atm_core_kept_regardless_of_liquidity() {
        // 26200 is within +/-2% of 26000 even with zero OI/volume.
        let mut chain = chain_with(&[(26200.0, 0, 0), (26000.0, 1000, 100)]);
        filter_strikes(&mut chain);
        assert!(has_strike(&chain, 26200.0));
    }

    #[test]
    fn test_exact_core_boundary_kept() {
        // Exactly +2% of spot sits on the core boundary and is retained.
        let mut chain = chain_with(&[(26520.0, 0, 0), (26000.0, 1000, 100)]);
        filter_strikes(&mut chain);
        assert!(has_strike(&chain, 26520.0));
    }

    #[test]
    fn test_illiquid_outside_core_dropped() {
        // 27600 is ~6.2% out: fails both the core and the 5% exemption,
        // so the liquidity floors apply.
        let mut chain = chain_with(&[(27600.0, 10, 1), (26000.0, 1000, 100)]);
        filter_strikes(&mut chain);
        assert!(!has_strike(&chain, 27600.0));
    }

    #[test]
    fn test_liquid_outside_core_kept() {
        let mut chain = chain_with(&[(27600.0, 500, 50), (26000.0, 1000, 100)]);
        filter_strikes(&mut chain);
        assert!(has_strike(&chain, 27600.0));
    }

    #[test]
    fn test_five_percent_exemption() {
        // ~3.8% out: illiquid but inside the 5% exemption band.
        let mut chain = chain_with(&[(27000.0, 0, 0), (26000.0, 1000, 100)]);
        filter_strikes(&mut chain);
        assert!(has_strike(&chain, 27000.0));
    }

    #[test]
    fn test_totals_recomputed_after_filter() {
        let mut chain = chain_with(&[(23000.0, 1000, 100), (26000.0, 700, 100)]);
        filter_strikes(&mut chain);
        assert_eq!(chain.total_call_oi, 700);
        assert_eq!(chain.total_put_oi, 700);
    }
}
