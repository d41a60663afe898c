//! Trailguard Core Library
//!
//! Shared domain types, errors, and configuration for the trailing stop-loss engine.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
