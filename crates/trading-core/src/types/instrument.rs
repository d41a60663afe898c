//! Option contract identity.

use crate::Error;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "CE"),
            OptionType::Put => write!(f, "PE"),
        }
    }
}

impl FromStr for OptionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CE" | "CALL" => Ok(OptionType::Call),
            "PE" | "PUT" => Ok(OptionType::Put),
            other => Err(Error::InvalidInstrument(format!("unknown option type {other}"))),
        }
    }
}

/// Market-data identity of an options contract: underlying, expiry, strike, and side.
///
/// Translation to a broker's own instrument identifier happens behind the
/// order gateway; the engine only ever sees this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub option_type: OptionType,
}

impl InstrumentKey {
    pub fn new(
        symbol: impl Into<String>,
        expiry: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            expiry,
            strike: strike.normalize(),
            option_type,
        }
    }
}

/// Formats as `SYMBOL:YYYY-MM-DD:STRIKE:CE`, the same form `FromStr` accepts.
impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.symbol,
            self.expiry.format("%Y-%m-%d"),
            self.strike,
            self.option_type
        )
    }
}

impl FromStr for InstrumentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [symbol, expiry, strike, option_type] = parts.as_slice() else {
            return Err(Error::InvalidInstrument(format!(
                "expected SYMBOL:YYYY-MM-DD:STRIKE:TYPE, got {s}"
            )));
        };

        if symbol.is_empty() {
            return Err(Error::InvalidInstrument("empty symbol".to_string()));
        }
        let expiry = NaiveDate::parse_from_str(expiry, "%Y-%m-%d")
            .map_err(|e| Error::InvalidInstrument(format!("bad expiry {expiry}: {e}")))?;
        let strike = Decimal::from_str(strike)
            .map_err(|e| Error::InvalidInstrument(format!("bad strike {strike}: {e}")))?;

        Ok(Self::new(*symbol, expiry, strike, option_type.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let key: InstrumentKey = "NIFTY:2025-08-07:24500:CE".parse().unwrap();
        assert_eq!(key.symbol, "NIFTY");
        assert_eq!(key.strike, Decimal::new(24500, 0));
        assert_eq!(key.option_type, OptionType::Call);
        assert_eq!(key.to_string(), "NIFTY:2025-08-07:24500:CE");
    }

    #[test]
    fn test_strike_is_normalized() {
        let a: InstrumentKey = "NIFTY:2025-08-07:24500.00:PE".parse().unwrap();
        let b: InstrumentKey = "NIFTY:2025-08-07:24500:pe".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!("NIFTY:2025-08-07:24500".parse::<InstrumentKey>().is_err());
        assert!("NIFTY:07-08-2025:24500:CE".parse::<InstrumentKey>().is_err());
        assert!("NIFTY:2025-08-07:abc:CE".parse::<InstrumentKey>().is_err());
        assert!("NIFTY:2025-08-07:24500:XX".parse::<InstrumentKey>().is_err());
    }
}
