//! Errors raised by the risk rules.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error("override target must be positive, got {0}")]
    InvalidOverrideTarget(Decimal),

    #[error("trailing step must be positive, got {0}")]
    InvalidStep(Decimal),
}
