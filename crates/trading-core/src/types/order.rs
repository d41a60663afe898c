//! Order types exchanged with the order gateway.

use super::InstrumentKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// A market order for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    pub instrument: InstrumentKey,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Price that triggered the order. Gateways that simulate fills use it as
    /// the fill price; live gateways may ignore it.
    pub reference_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn new(
        instrument: InstrumentKey,
        side: OrderSide,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument,
            side,
            quantity,
            reference_price,
            created_at: Utc::now(),
        }
    }

    pub fn buy(instrument: InstrumentKey, quantity: Decimal, reference_price: Decimal) -> Self {
        Self::new(instrument, OrderSide::Buy, quantity, reference_price)
    }

    pub fn sell(instrument: InstrumentKey, quantity: Decimal, reference_price: Decimal) -> Self {
        Self::new(instrument, OrderSide::Sell, quantity, reference_price)
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }
}

/// Confirmation of an executed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    /// Fill the whole request at `price`.
    pub fn for_request(request: &OrderRequest, price: Decimal) -> Self {
        Self {
            order_id: request.id,
            side: request.side,
            price,
            quantity: request.quantity,
            filled_at: Utc::now(),
        }
    }

    pub fn total_value(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Why the gateway could not execute an order.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum OrderError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("transient gateway failure: {0}")]
    TransientFailure(String),

    #[error("symbol rejected by gateway: {0}")]
    SymbolInvalid(String),
}

impl OrderError {
    /// Only transient failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::TransientFailure(_))
    }
}
