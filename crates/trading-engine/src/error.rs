//! Engine error types.

use risk_manager::RiskError;
use rust_decimal::Decimal;
use thiserror::Error;
use trading_core::types::{OrderError, TransitionError};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("position not found: {0}")]
    PositionNotFound(Uuid),

    #[error("position {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("position {0} holds no quantity while waiting for re-entry")]
    NothingHeld(Uuid),

    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("order failed: {0}")]
    Gateway(#[from] OrderError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("tick dispatcher is closed")]
    DispatcherClosed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
