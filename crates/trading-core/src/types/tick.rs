//! Last-traded-price ticks.

use super::InstrumentKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A last-traded-price observation for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub instrument: InstrumentKey,
    pub ltp: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(instrument: InstrumentKey, ltp: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            instrument,
            ltp,
            timestamp,
        }
    }

    /// Tick stamped with the current time.
    pub fn now(instrument: InstrumentKey, ltp: Decimal) -> Self {
        Self::new(instrument, ltp, Utc::now())
    }

    /// A usable tick carries a positive price.
    pub fn is_valid(&self) -> bool {
        self.ltp > Decimal::ZERO
    }
}
