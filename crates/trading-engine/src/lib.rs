//! Trading Engine
//!
//! Tick-driven position management: order gateway and executor, the
//! per-position state machine, the tick worker pool, and the trade event feed.

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod position_store;
pub mod stats;
pub mod trade_log;

pub use dispatcher::TickDispatcher;
pub use error::{EngineError, Result};
pub use executor::{ExecutionMetrics, ExecutorConfig, OrderExecutor};
pub use gateway::{OrderGateway, PaperGateway};
pub use position_store::{PositionStore, PositionView};
pub use stats::{EngineStats, StatsSnapshot};
pub use trade_log::TradeLog;
