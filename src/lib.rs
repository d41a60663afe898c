//! Trailguard: per-position trailing stop-loss and re-entry engine
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the internal modules. For actual functionality, use the individual
//! crates directly:
//!
//! - `trading-core`: Instrument, tick, order, position and event types; configuration
//! - `risk-manager`: Trailing-stop strategies, manual overrides, re-entry scheduling, execution guard
//! - `trading-engine`: Position store, tick dispatcher, order execution, trade log
//! - `tick-replay`: Command-line replay of recorded ticks against a paper wallet

// Re-export for benchmarks
pub use risk_manager as risk;
pub use trading_core as core;
pub use trading_engine as trading;
