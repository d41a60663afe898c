//! Trade events published by the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    ManualBuy,
    ManualSell,
    /// Closed without an order (nothing was held).
    ManualClose,
    AutoSell,
    AutoBuy,
    CooldownEngaged,
    SellFailed,
    BuyFailed,
}

/// Why it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TradeReason {
    /// User opened the position.
    ManualEntry,
    /// User closed the position.
    ManualExit,
    /// Trailing stop hit above entry.
    TrailingStopProfit,
    /// Stop hit at or below entry.
    StopLoss,
    /// Manual override above entry reached.
    ManualProfitTarget,
    /// Manual override at or below entry reached.
    ManualStopLoss,
    /// Price came back to the re-entry trigger.
    ReEntry,
    /// Too many auto-buys; the trigger was widened.
    Cooldown { next_trigger: Decimal },
    /// A re-entry fill landed after the user closed the position; it was sold back.
    FillAfterClose,
    /// The gateway refused or failed the order.
    Gateway(String),
}

impl fmt::Display for TradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeReason::ManualEntry => write!(f, "manual entry"),
            TradeReason::ManualExit => write!(f, "manual exit"),
            TradeReason::TrailingStopProfit => write!(f, "trailing stop (profit booking)"),
            TradeReason::StopLoss => write!(f, "stop loss"),
            TradeReason::ManualProfitTarget => write!(f, "manual profit target"),
            TradeReason::ManualStopLoss => write!(f, "manual stop loss"),
            TradeReason::ReEntry => write!(f, "re-entry"),
            TradeReason::Cooldown { next_trigger } => {
                write!(f, "cooldown, next trigger {}", next_trigger)
            }
            TradeReason::FillAfterClose => write!(f, "fill after manual close"),
            TradeReason::Gateway(message) => write!(f, "gateway: {}", message),
        }
    }
}

/// One entry of the append-only trade feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Sequence number assigned by the trade log.
    pub seq: u64,
    pub position_id: Uuid,
    pub action: TradeAction,
    pub price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub reason: TradeReason,
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(
        position_id: Uuid,
        action: TradeAction,
        price: Decimal,
        quantity: Decimal,
        pnl: Decimal,
        reason: TradeReason,
    ) -> Self {
        Self {
            seq: 0,
            position_id,
            action,
            price,
            quantity,
            pnl,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Event that carries no order (cooldown, close without holdings, failures).
    pub fn notice(position_id: Uuid, action: TradeAction, price: Decimal, reason: TradeReason) -> Self {
        Self::new(position_id, action, price, Decimal::ZERO, Decimal::ZERO, reason)
    }

    pub fn is_trade(&self) -> bool {
        matches!(
            self.action,
            TradeAction::ManualBuy | TradeAction::ManualSell | TradeAction::AutoSell | TradeAction::AutoBuy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serialization() {
        let reason = TradeReason::Cooldown {
            next_trigger: Decimal::new(104, 0),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "cooldown");

        let failed = TradeReason::Gateway("insufficient funds".to_string());
        assert_eq!(failed.to_string(), "gateway: insufficient funds");
    }

    #[test]
    fn test_notice_is_not_a_trade() {
        let id = Uuid::new_v4();
        let notice = TradeEvent::notice(
            id,
            TradeAction::SellFailed,
            Decimal::new(99, 0),
            TradeReason::Gateway("timeout".into()),
        );
        assert!(!notice.is_trade());
        assert_eq!(notice.quantity, Decimal::ZERO);

        let sell = TradeEvent::new(
            id,
            TradeAction::AutoSell,
            Decimal::new(99, 0),
            Decimal::new(75, 0),
            Decimal::new(-75, 0),
            TradeReason::StopLoss,
        );
        assert!(sell.is_trade());
    }
}
