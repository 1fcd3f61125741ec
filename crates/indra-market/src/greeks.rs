//! Black-Scholes pricing and Greeks.
//!
//! Used when the feed does not quote Greeks for a leg. Inputs follow the
//! chain conventions: IV in percent, DTE in years clamped to >= 0.001,
//! risk-free rate 0.07 annual.

use indra_core::{Greeks, OptionRight};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Annual risk-free rate used for index options.
pub const RISK_FREE_RATE: f64 = 0.07;

/// Minimum time to expiry in years; keeps expiry-day Greeks finite.
pub const MIN_T_YEARS: f64 = 0.001;

/// Trading days per year for DTE conversion.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Theoretical Black-Scholes price.
///
/// `iv_pct` is quoted IV in percent. Returns intrinsic value when the
/// vol or time input degenerates.
pub fn bs_price(spot: f64, strike: f64, t_years: f64, iv_pct: f64, right: OptionRight) -> f64 {
    let t = t_years.max(MIN_T_YEARS);
    let sigma = iv_pct / 100.0;
    if spot <= 0.0 || strike <= 0.0 || sigma <= 0.0 {
        return intrinsic(spot, strike, right);
    }
    let normal = Normal::new(0.0, 1.0).expect("standard normal");
    let (d1, d2) = d1_d2(spot, strike, t, sigma);
    let df = (-RISK_FREE_RATE * t).exp();
    match right {
        OptionRight::Call => spot * normal.cdf(d1) - strike * df * normal.cdf(d2),
        OptionRight::Put => strike * df * normal.cdf(-d2) - spot * normal.cdf(-d1),
    }
}

/// Black-Scholes Greeks for one leg.
///
/// Theta is per calendar day; vega is per 1 vol-point (1%).
pub fn black_scholes_greeks(
    spot: f64,
    strike: f64,
    days_to_expiry: f64,
    iv_pct: f64,
    right: OptionRight,
) -> Greeks {
    let t = (days_to_expiry / DAYS_PER_YEAR).max(MIN_T_YEARS);
    let sigma = iv_pct / 100.0;
    if spot <= 0.0 || strike <= 0.0 || sigma <= 0.0 {
        return Greeks::default();
    }
    let normal = Normal::new(0.0, 1.0).expect("standard normal");
    let (d1, d2) = d1_d2(spot, strike, t, sigma);
    let pdf_d1 = normal.pdf(d1);
    let df = (-RISK_FREE_RATE * t).exp();
    let sqrt_t = t.sqrt();

    let delta = match right {
        OptionRight::Call => normal.cdf(d1),
        OptionRight::Put => normal.cdf(d1) - 1.0,
    };
    let gamma = pdf_d1 / (spot * sigma * sqrt_t);
    let vega = spot * pdf_d1 * sqrt_t / 100.0;
    let theta_annual = match right {
        OptionRight::Call => {
            -(spot * pdf_d1 * sigma) / (2.0 * sqrt_t) - RISK_FREE_RATE * strike * df * normal.cdf(d2)
        }
        OptionRight::Put => {
            -(spot * pdf_d1 * sigma) / (2.0 * sqrt_t)
                + RISK_FREE_RATE * strike * df * normal.cdf(-d2)
        }
    };

    Greeks {
        delta,
        gamma,
        theta: theta_annual / DAYS_PER_YEAR,
        vega,
    }
}

fn d1_d2(spot: f64, strike: f64, t: f64, sigma: f64) -> (f64, f64) {
    let sqrt_t = t.sqrt();
    let d1 = ((spot / strike).ln() + (RISK_FREE_RATE + sigma * sigma / 2.0) * t) / (sigma * sqrt_t);
    (d1, d1 - sigma * sqrt_t)
}

fn intrinsic(spot: f64, strike: f64, right: OptionRight) -> f64 {
    match right {
        OptionRight::Call => (spot - strike).max(0.0),
        OptionRight::Put => (strike - spot).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atm_call_delta_near_half() {
        let g = black_scholes_greeks(26100.0, 26100.0, 2.0, 15.0, OptionRight::Call);
        assert!(g.delta > 0.45 && g.delta < 0.60, "delta={}", g.delta);
    }

    #[test]
    fn test_put_call_delta_parity() {
        let call = black_scholes_greeks(26100.0, 26100.0, 2.0, 15.0, OptionRight::Call);
        let put = black_scholes_greeks(26100.0, 26100.0, 2.0, 15.0, OptionRight::Put);
        assert!((call.delta - put.delta - 1.0).abs() < 1e-9);
        // Gamma and vega are right-independent.
        assert!((call.gamma - put.gamma).abs() < 1e-12);
        assert!((call.vega - put.vega).abs() < 1e-12);
    }

    #[test]
    fn test_deep_itm_call_delta_near_one() {
        let g = black_scholes_greeks(26100.0, 24000.0, 2.0, 15.0, OptionRight::Call);
        assert!(g.delta > 0.99);
    }

    #[test]
    fn test_theta_negative_for_longs() {
        let call = black_scholes_greeks(26100.0, 26100.0, 2.0, 15.0, OptionRight::Call);
        assert!(call.theta < 0.0);
    }

    #[test]
    fn test_expiry_day_clamps_time() {
        // DTE 0 must not blow up; the floor keeps Greeks finite.
        let g = black_scholes_greeks(26100.0, 26100.0, 0.0, 15.0, OptionRight::Call);
        assert!(g.delta.is_finite() && g.gamma.is_finite());
    }

    #[test]
    fn test_price_above_intrinsic() {
        let price = bs_price(26100.0, 26000.0, 2.0 / 365.0, 15.0, OptionRight::Call);
        assert!(price > 100.0);
        assert!(price < 600.0);
    }

    #[test]
    fn test_degenerate_vol_returns_intrinsic() {
        assert_eq!(bs_price(26100.0, 26000.0, 0.01, 0.0, OptionRight::Call), 100.0);
        assert_eq!(bs_price(26100.0, 26000.0, 0.01, 0.0, OptionRight::Put), 0.0);
    }
}
