//! Risk Manager
//!
//! Per-position decision rules: trailing stop-loss strategies, manual overrides,
//! at-most-once execution guards, and re-entry cooldown scheduling.

pub mod error;
pub mod guard;
pub mod manual_override;
pub mod reentry;
pub mod trailing;

pub use error::RiskError;
pub use guard::{ActionGuard, EpisodeTicket, ExecutionGuard, GuardedAction};
pub use manual_override::{ManualOverrideHandler, OverrideKind, OverrideStatus};
pub use reentry::{ReEntryPlan, ReEntryScheduler};
pub use trailing::{
    PhasedTrailingStop, SimpleTrailingStop, TrailState, TrailingStop, TrailingStopCalculator,
};
