//! Precision-safe numeric types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic, avoiding
//! floating-point rounding errors in money calculations. Quantities are
//! whole contract units (lot multiples), so they stay integral.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price in rupees with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with quantities in calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Lossy construction from a feed float. Returns ZERO for NaN/inf.
    #[inline]
    pub fn from_f64_lossy(value: f64) -> Self {
        Self(Decimal::from_f64(value).unwrap_or(Decimal::ZERO))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Percentage difference from another price.
    #[inline]
    pub fn pct_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::from(100))
    }

    /// Round to the nearest strike multiple (e.g. 50 for NIFTY, 100 for SENSEX).
    #[inline]
    pub fn round_to_step(&self, step: Decimal) -> Self {
        if step.is_zero() {
            return *self;
        }
        Self((self.0 / step).round() * step)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Contract quantity in whole units.
///
/// Index option orders are placed in lot multiples (75 for NIFTY,
/// 20 for SENSEX); a `Qty` always holds the unit count, not the lot count.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qty(pub i64);

impl Qty {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(units: i64) -> Self {
        Self(units)
    }

    #[inline]
    pub fn units(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Number of whole lots at the given lot size (floor).
    #[inline]
    pub fn lots(&self, lot_size: i64) -> i64 {
        if lot_size <= 0 {
            return 0;
        }
        self.0 / lot_size
    }

    /// Round down to a lot multiple.
    #[inline]
    pub fn round_to_lot(&self, lot_size: i64) -> Self {
        if lot_size <= 0 {
            return *self;
        }
        Self((self.0 / lot_size) * lot_size)
    }

    #[inline]
    pub fn is_lot_multiple(&self, lot_size: i64) -> bool {
        lot_size > 0 && self.0 % lot_size == 0
    }

    /// Notional value: units x price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        Decimal::from(self.0) * price.inner()
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Qty {
    fn from(units: i64) -> Self {
        Self(units)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_pct_from() {
        let entry = Price::new(dec!(80.35));
        let ltp = Price::new(dec!(88.40));
        let pct = ltp.pct_from(entry).unwrap();
        assert!(pct > dec!(10.0) && pct < dec!(10.1));
    }

    #[test]
    fn test_price_round_to_step() {
        let spot = Price::new(dec!(26132.45));
        assert_eq!(spot.round_to_step(dec!(50)).inner(), dec!(26150));
        assert_eq!(spot.round_to_step(dec!(100)).inner(), dec!(26100));
    }

    #[test]
    fn test_qty_lot_handling() {
        let q = Qty::new(170);
        assert_eq!(q.round_to_lot(75), Qty::new(150));
        assert_eq!(q.lots(75), 2);
        assert!(!q.is_lot_multiple(75));
        assert!(Qty::new(150).is_lot_multiple(75));
    }

    #[test]
    fn test_qty_notional() {
        let q = Qty::new(75);
        let p = Price::new(dec!(80.35));
        assert_eq!(q.notional(p), dec!(6026.25));
    }
}
