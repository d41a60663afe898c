//! User-supplied stop-loss / take-profit overrides with a fixed lifetime.

use crate::RiskError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trading_core::config::RiskConfig;
use trading_core::types::ManualOverride;

/// How an active override is interpreted relative to entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// Target above entry: sell once price reaches it.
    TakeProfit,
    /// Target at or below entry: sell once price drops to it.
    StopLoss,
}

/// Outcome of looking at a position's override on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideStatus {
    Inactive,
    Active { target: Decimal, kind: OverrideKind },
    /// Past its lifetime; the caller should clear it.
    Expired,
}

impl OverrideStatus {
    /// Whether `price` reaches an active target.
    pub fn is_triggered(&self, price: Decimal) -> bool {
        match self {
            OverrideStatus::Active {
                target,
                kind: OverrideKind::TakeProfit,
            } => price >= *target,
            OverrideStatus::Active {
                target,
                kind: OverrideKind::StopLoss,
            } => price <= *target,
            OverrideStatus::Inactive | OverrideStatus::Expired => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManualOverrideHandler {
    ttl: Duration,
}

impl ManualOverrideHandler {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(Duration::seconds(config.override_ttl_secs))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn validate(&self, target_price: Decimal) -> Result<(), RiskError> {
        if target_price <= Decimal::ZERO {
            return Err(RiskError::InvalidOverrideTarget(target_price));
        }
        Ok(())
    }

    /// Build a fresh override. Setting a new one replaces any previous override.
    pub fn new_override(&self, target_price: Decimal, now: DateTime<Utc>) -> Result<ManualOverride, RiskError> {
        self.validate(target_price)?;
        Ok(ManualOverride {
            target_price,
            set_at: now,
        })
    }

    pub fn is_expired(&self, manual: &ManualOverride, now: DateTime<Utc>) -> bool {
        now - manual.set_at >= self.ttl
    }

    pub fn apply(
        &self,
        manual: Option<&ManualOverride>,
        entry_price: Decimal,
        now: DateTime<Utc>,
    ) -> OverrideStatus {
        let Some(manual) = manual else {
            return OverrideStatus::Inactive;
        };
        if self.is_expired(manual, now) {
            return OverrideStatus::Expired;
        }

        let kind = if manual.target_price > entry_price {
            OverrideKind::TakeProfit
        } else {
            OverrideKind::StopLoss
        };
        OverrideStatus::Active {
            target: manual.target_price,
            kind,
        }
    }
}
