//! Core domain types for the trailguard engine.

pub mod event;
pub mod instrument;
pub mod order;
pub mod position;
pub mod tick;

pub use event::*;
pub use instrument::*;
pub use order::*;
pub use position::*;
pub use tick::*;
