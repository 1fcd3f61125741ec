//! Instrument identity and broker key construction.
//!
//! Instrument keys follow the broker's wire format:
//! - index: `NSE_INDEX|Nifty 50`, `BSE_INDEX|SENSEX`
//! - option: `<EXCH>_FO|<SYMBOL><DDMMMYYYY upper><CE|PE><STRIKE>`
//!
//! Quote responses may echo keys with `:` where requests used `|`;
//! `normalize_response_key` maps them back.

use crate::error::{CoreError, Result};
use crate::Price;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported underlying index symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexSymbol {
    Nifty,
    Sensex,
}

impl IndexSymbol {
    pub const ALL: [IndexSymbol; 2] = [IndexSymbol::Nifty, IndexSymbol::Sensex];

    /// Trading symbol as the broker spells it in F&O keys.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Nifty => "NIFTY",
            Self::Sensex => "SENSEX",
        }
    }

    /// Broker key for the underlying index itself.
    pub fn index_key(&self) -> &'static str {
        match self {
            Self::Nifty => "NSE_INDEX|Nifty 50",
            Self::Sensex => "BSE_INDEX|SENSEX",
        }
    }

    /// F&O segment prefix for option keys.
    pub fn fo_segment(&self) -> &'static str {
        match self {
            Self::Nifty => "NSE_FO",
            Self::Sensex => "BSE_FO",
        }
    }

    /// Strike spacing in index points.
    pub fn strike_step(&self) -> Decimal {
        match self {
            Self::Nifty => Decimal::from(50),
            Self::Sensex => Decimal::from(100),
        }
    }

    /// Contract lot size in units.
    pub fn lot_size(&self) -> i64 {
        match self {
            Self::Nifty => 75,
            Self::Sensex => 20,
        }
    }

    /// Nearest strike to the given spot.
    pub fn atm_strike(&self, spot: Price) -> Price {
        spot.round_to_step(self.strike_step())
    }
}

impl fmt::Display for IndexSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for IndexSymbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NIFTY" | "NIFTY50" | "NIFTY 50" => Ok(Self::Nifty),
            "SENSEX" => Ok(Self::Sensex),
            other => Err(CoreError::UnknownSymbol(other.to_string())),
        }
    }
}

/// Option right (CE/PE in broker notation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// Broker suffix for option keys.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

impl FromStr for OptionRight {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CALL" | "CE" => Ok(Self::Call),
            "PUT" | "PE" => Ok(Self::Put),
            other => Err(CoreError::InvalidInstrumentKey(format!(
                "unknown option right: {other}"
            ))),
        }
    }
}

/// Instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentKind {
    Index,
    Option,
}

/// A tradable instrument: an index or a single option leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: IndexSymbol,
    pub kind: InstrumentKind,
    /// Strike price; options only.
    pub strike: Option<Price>,
    /// Contract expiry; options only.
    pub expiry: Option<NaiveDate>,
    /// Option right; options only.
    pub right: Option<OptionRight>,
    /// Broker instrument key (pipe form).
    pub key: String,
}

impl Instrument {
    /// The underlying index itself.
    pub fn index(symbol: IndexSymbol) -> Self {
        Self {
            symbol,
            kind: InstrumentKind::Index,
            strike: None,
            expiry: None,
            right: None,
            key: symbol.index_key().to_string(),
        }
    }

    /// A single option leg.
    pub fn option(
        symbol: IndexSymbol,
        strike: Price,
        right: OptionRight,
        expiry: NaiveDate,
    ) -> Self {
        let key = option_key(symbol, strike, right, expiry);
        Self {
            symbol,
            kind: InstrumentKind::Option,
            strike: Some(strike),
            expiry: Some(expiry),
            right: Some(right),
            key,
        }
    }

    /// Whether all fields required to price and exit the leg are present.
    ///
    /// Options missing any of strike/expiry/right cannot be priced and
    /// must be quarantined on reload.
    pub fn is_complete(&self) -> bool {
        match self.kind {
            InstrumentKind::Index => true,
            InstrumentKind::Option => {
                self.strike.is_some() && self.expiry.is_some() && self.right.is_some()
            }
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Build a broker option key: `NSE_FO|NIFTY26MAR2026CE26150`.
///
/// Whole-number strikes are serialized without a trailing `.0`.
pub fn option_key(
    symbol: IndexSymbol,
    strike: Price,
    right: OptionRight,
    expiry: NaiveDate,
) -> String {
    let expiry_str = expiry.format("%d%b%Y").to_string().to_ascii_uppercase();
    let strike_str = format_strike(strike);
    format!(
        "{}|{}{}{}{}",
        symbol.fo_segment(),
        symbol.code(),
        expiry_str,
        right.suffix(),
        strike_str
    )
}

fn format_strike(strike: Price) -> String {
    let d = strike.inner().normalize();
    if d.fract().is_zero() {
        d.trunc().to_string()
    } else {
        d.to_string()
    }
}

/// Map a quote-response key back to the pipe form used in requests.
///
/// The broker echoes `NSE_FO:NIFTY...` for requests made with
/// `NSE_FO|NIFTY...`; only the first separator is rewritten.
pub fn normalize_response_key(key: &str) -> String {
    match key.split_once(':') {
        Some((segment, rest)) if !key.contains('|') => format!("{segment}|{rest}"),
        _ => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_option_key_format() {
        let key = option_key(
            IndexSymbol::Nifty,
            Price::new(dec!(26150)),
            OptionRight::Call,
            date(2026, 3, 26),
        );
        assert_eq!(key, "NSE_FO|NIFTY26MAR2026CE26150");
    }

    #[test]
    fn test_option_key_sensex_put() {
        let key = option_key(
            IndexSymbol::Sensex,
            Price::new(dec!(85300)),
            OptionRight::Put,
            date(2026, 8, 4),
        );
        assert_eq!(key, "BSE_FO|SENSEX04AUG2026PE85300");
    }

    #[test]
    fn test_option_key_strips_trailing_zero() {
        let key = option_key(
            IndexSymbol::Nifty,
            Price::new(dec!(26150.0)),
            OptionRight::Call,
            date(2026, 3, 26),
        );
        assert!(key.ends_with("CE26150"));
    }

    #[test]
    fn test_normalize_response_key() {
        assert_eq!(
            normalize_response_key("NSE_FO:NIFTY26MAR2026CE26150"),
            "NSE_FO|NIFTY26MAR2026CE26150"
        );
        // Already pipe-form keys pass through unchanged.
        assert_eq!(
            normalize_response_key("NSE_INDEX|Nifty 50"),
            "NSE_INDEX|Nifty 50"
        );
    }

    #[test]
    fn test_atm_strike() {
        assert_eq!(
            IndexSymbol::Nifty.atm_strike(Price::new(dec!(26132.45))),
            Price::new(dec!(26150))
        );
        assert_eq!(
            IndexSymbol::Sensex.atm_strike(Price::new(dec!(85262.0))),
            Price::new(dec!(85300))
        );
    }

    #[test]
    fn test_instrument_completeness() {
        let leg = Instrument::option(
            IndexSymbol::Nifty,
            Price::new(dec!(26150)),
            OptionRight::Call,
            date(2026, 3, 26),
        );
        assert!(leg.is_complete());

        let mut broken = leg.clone();
        broken.expiry = None;
        assert!(!broken.is_complete());
    }

    #[test]
    fn test_symbol_parsing_aliases() {
        assert_eq!("nifty 50".parse::<IndexSymbol>().unwrap(), IndexSymbol::Nifty);
        assert_eq!("SENSEX".parse::<IndexSymbol>().unwrap(), IndexSymbol::Sensex);
        assert!("BANKNIFTY".parse::<IndexSymbol>().is_err());
    }
}
