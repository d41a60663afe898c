//! Position records and their lifecycle.

use super::InstrumentKey;
use crate::Error;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Trailing stop strategy assigned to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Fixed-step trailing anchored at entry.
    Simple,
    /// Three-phase trailing with a ratcheting progressive minimum.
    #[serde(alias = "advanced")]
    Phased,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Simple => write!(f, "simple"),
            StrategyKind::Phased => write!(f, "phased"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(StrategyKind::Simple),
            "phased" | "advanced" => Ok(StrategyKind::Phased),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

/// Regime of the phased strategy, derived from how far price sits above entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    One,
    Two,
    Three,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
            Phase::Three => 3,
        }
    }
}

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// Holding quantity; stop-loss is being trailed.
    Running,
    /// A sell was authorized and is awaiting the gateway.
    SellInProgress,
    /// Liquidated by the stop; waiting for price to reach the re-entry trigger.
    WaitingReentry,
    /// Like `WaitingReentry` with a widened trigger after repeated cycles.
    Cooldown,
    /// The gateway failed to sell after all retries; quantity is still held.
    ActionFailed,
    /// Closed by the user. Terminal.
    ManuallyClosed,
}

impl PositionMode {
    pub fn awaiting_reentry(&self) -> bool {
        matches!(self, PositionMode::WaitingReentry | PositionMode::Cooldown)
    }
}

/// A user-supplied stop-loss or target that supersedes the calculator while fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub target_price: Decimal,
    pub set_at: DateTime<Utc>,
}

/// Illegal lifecycle transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {action} a position in {from:?} mode")]
pub struct TransitionError {
    pub action: &'static str,
    pub from: PositionMode,
}

/// One open or pending options contract held by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub instrument: InstrumentKey,
    pub strategy: StrategyKind,
    /// Quantity currently held; zero while liquidated.
    pub quantity: Decimal,
    /// Quantity bought back on re-entry.
    pub lot_quantity: Decimal,
    /// Anchor for stop-loss arithmetic; re-anchored on every auto-buy.
    pub entry_price: Decimal,
    /// Fill price of the opening manual buy; never re-anchored.
    pub manual_entry_price: Decimal,
    pub current_price: Decimal,
    pub highest_price: Decimal,
    pub stop_loss_price: Decimal,
    /// Phased strategy only.
    pub phase: Option<Phase>,
    /// Phased strategy only; set on first entry into phase 2.
    pub progressive_minimum: Option<Decimal>,
    /// Phased strategy only.
    pub highest_stop_loss_ever: Option<Decimal>,
    pub mode: PositionMode,
    pub manual_override: Option<ManualOverride>,
    pub auto_buy_count: u32,
    pub auto_sell_count: u32,
    pub re_entry_trigger_price: Option<Decimal>,
    /// Per-position cooldown switch; cooldown also needs the global switch.
    pub cooldown_enabled: bool,
    pub realized_pnl: Decimal,
    /// Last gateway failure, kept for operators.
    pub failure_reason: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Open a running position from a manual buy fill. The initial stop sits one
    /// `step` below the fill.
    pub fn open(
        instrument: InstrumentKey,
        strategy: StrategyKind,
        fill_price: Decimal,
        quantity: Decimal,
        step: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instrument,
            strategy,
            quantity,
            lot_quantity: quantity,
            entry_price: fill_price,
            manual_entry_price: fill_price,
            current_price: fill_price,
            highest_price: fill_price,
            stop_loss_price: fill_price - step,
            phase: match strategy {
                StrategyKind::Simple => None,
                StrategyKind::Phased => Some(Phase::One),
            },
            progressive_minimum: None,
            highest_stop_loss_ever: None,
            mode: PositionMode::Running,
            manual_override: None,
            auto_buy_count: 0,
            auto_sell_count: 0,
            re_entry_trigger_price: None,
            cooldown_enabled: true,
            realized_pnl: Decimal::ZERO,
            failure_reason: None,
            opened_at: now,
            last_tick_at: None,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.mode == PositionMode::ManuallyClosed
    }

    /// Mark-to-market P&L of the held quantity.
    pub fn unrealized_pnl(&self) -> Decimal {
        if self.quantity > Decimal::ZERO {
            (self.current_price - self.entry_price) * self.quantity
        } else {
            Decimal::ZERO
        }
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl()
    }

    /// Hand the position to the gateway for selling.
    pub fn begin_sell(&mut self) -> Result<(), TransitionError> {
        match self.mode {
            PositionMode::Running | PositionMode::ActionFailed => {
                self.mode = PositionMode::SellInProgress;
                self.updated_at = Utc::now();
                Ok(())
            }
            from => Err(TransitionError {
                action: "begin selling",
                from,
            }),
        }
    }

    /// Book a confirmed sell fill. Returns the realized P&L of the fill.
    pub fn settle_sell(&mut self, fill_price: Decimal) -> Result<Decimal, TransitionError> {
        if self.mode != PositionMode::SellInProgress {
            return Err(TransitionError {
                action: "settle a sell for",
                from: self.mode,
            });
        }
        let pnl = (fill_price - self.entry_price) * self.quantity;
        self.realized_pnl += pnl;
        self.quantity = Decimal::ZERO;
        self.current_price = fill_price;
        self.failure_reason = None;
        self.updated_at = Utc::now();
        Ok(pnl)
    }

    /// After a settled sell, wait for price to reach `trigger`.
    pub fn await_reentry(&mut self, trigger: Decimal, cooldown: bool) -> Result<(), TransitionError> {
        if self.mode != PositionMode::SellInProgress || self.quantity > Decimal::ZERO {
            return Err(TransitionError {
                action: "schedule re-entry for",
                from: self.mode,
            });
        }
        self.re_entry_trigger_price = Some(trigger);
        self.manual_override = None;
        self.mode = if cooldown {
            PositionMode::Cooldown
        } else {
            PositionMode::WaitingReentry
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Book a confirmed re-entry fill and resume running. Trailing fields are
    /// re-anchored by the caller.
    pub fn settle_reentry(&mut self, fill: &super::Fill) -> Result<(), TransitionError> {
        if !self.mode.awaiting_reentry() {
            return Err(TransitionError {
                action: "settle a re-entry for",
                from: self.mode,
            });
        }
        self.quantity = fill.quantity;
        self.current_price = fill.price;
        self.re_entry_trigger_price = None;
        self.failure_reason = None;
        self.mode = PositionMode::Running;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The gateway gave up on a sell; keep the quantity and surface the failure.
    pub fn fail_sell(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.mode != PositionMode::SellInProgress {
            return Err(TransitionError {
                action: "fail a sell for",
                from: self.mode,
            });
        }
        self.mode = PositionMode::ActionFailed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Terminal close. Any pending re-entry trigger and override are dropped.
    pub fn close_manually(&mut self) -> Result<(), TransitionError> {
        if self.mode == PositionMode::ManuallyClosed || self.quantity > Decimal::ZERO {
            return Err(TransitionError {
                action: "close",
                from: self.mode,
            });
        }
        self.mode = PositionMode::ManuallyClosed;
        self.re_entry_trigger_price = None;
        self.manual_override = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Get a human-readable status message.
    pub fn status_message(&self) -> String {
        match self.mode {
            PositionMode::Running => format!(
                "Running, SL {} (P&L {:.2})",
                self.stop_loss_price,
                self.unrealized_pnl()
            ),
            PositionMode::SellInProgress => "Sell in progress".to_string(),
            PositionMode::WaitingReentry => match self.re_entry_trigger_price {
                Some(trigger) => format!("Waiting for re-entry at {}", trigger),
                None => "Waiting for re-entry".to_string(),
            },
            PositionMode::Cooldown => match self.re_entry_trigger_price {
                Some(trigger) => format!("Cooldown, re-entry at {}", trigger),
                None => "Cooldown".to_string(),
            },
            PositionMode::ActionFailed => match &self.failure_reason {
                Some(reason) => format!("Sell failed: {}", reason),
                None => "Sell failed".to_string(),
            },
            PositionMode::ManuallyClosed => {
                format!("Closed, realized P&L {:.2}", self.realized_pnl)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fill, OptionType, OrderRequest};
    use chrono::NaiveDate;

    fn instrument() -> InstrumentKey {
        InstrumentKey::new(
            "NIFTY",
            NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            Decimal::new(24500, 0),
            OptionType::Call,
        )
    }

    fn open_position() -> Position {
        Position::open(
            instrument(),
            StrategyKind::Simple,
            Decimal::new(100, 0),
            Decimal::new(75, 0),
            Decimal::new(10, 0),
        )
    }

    #[test]
    fn test_open_sets_initial_stop() {
        let pos = open_position();
        assert_eq!(pos.mode, PositionMode::Running);
        assert_eq!(pos.stop_loss_price, Decimal::new(90, 0));
        assert_eq!(pos.highest_price, Decimal::new(100, 0));
        assert_eq!(pos.phase, None);

        let phased = Position::open(
            instrument(),
            StrategyKind::Phased,
            Decimal::new(100, 0),
            Decimal::new(75, 0),
            Decimal::new(10, 0),
        );
        assert_eq!(phased.phase, Some(Phase::One));
        assert_eq!(phased.progressive_minimum, None);
    }

    #[test]
    fn test_sell_then_reentry_cycle() {
        let mut pos = open_position();
        pos.begin_sell().unwrap();
        let pnl = pos.settle_sell(Decimal::new(95, 0)).unwrap();
        // (95 - 100) * 75
        assert_eq!(pnl, Decimal::new(-375, 0));
        assert_eq!(pos.quantity, Decimal::ZERO);
        assert_eq!(pos.lot_quantity, Decimal::new(75, 0));

        pos.await_reentry(Decimal::new(95, 0), false).unwrap();
        assert_eq!(pos.mode, PositionMode::WaitingReentry);

        let request = OrderRequest::buy(instrument(), pos.lot_quantity, Decimal::new(96, 0));
        let fill = Fill::for_request(&request, Decimal::new(96, 0));
        pos.settle_reentry(&fill).unwrap();
        assert_eq!(pos.mode, PositionMode::Running);
        assert_eq!(pos.quantity, Decimal::new(75, 0));
        assert_eq!(pos.re_entry_trigger_price, None);
    }

    #[test]
    fn test_failed_sell_keeps_quantity() {
        let mut pos = open_position();
        pos.begin_sell().unwrap();
        pos.fail_sell("gateway down").unwrap();
        assert_eq!(pos.mode, PositionMode::ActionFailed);
        assert_eq!(pos.quantity, Decimal::new(75, 0));
        assert!(pos.status_message().contains("gateway down"));

        // Operators can retry the sell from ActionFailed
        assert!(pos.begin_sell().is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut pos = open_position();
        // Cannot close while still holding quantity
        assert!(pos.close_manually().is_err());
        // Cannot settle without a sell in progress
        assert!(pos.settle_sell(Decimal::new(100, 0)).is_err());
        assert!(pos.await_reentry(Decimal::new(100, 0), false).is_err());

        pos.begin_sell().unwrap();
        assert!(pos.begin_sell().is_err());
        pos.settle_sell(Decimal::new(100, 0)).unwrap();
        pos.await_reentry(Decimal::new(100, 0), true).unwrap();
        assert_eq!(pos.mode, PositionMode::Cooldown);

        pos.close_manually().unwrap();
        assert!(pos.is_closed());
        assert_eq!(pos.re_entry_trigger_price, None);
        assert!(pos.close_manually().is_err());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("simple".parse::<StrategyKind>().unwrap(), StrategyKind::Simple);
        assert_eq!("Advanced".parse::<StrategyKind>().unwrap(), StrategyKind::Phased);
        assert!("momentum".parse::<StrategyKind>().is_err());
    }
}
