//! Order execution with timeout, retries, and latency metrics.

use crate::gateway::OrderGateway;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use trading_core::types::{Fill, OrderError, OrderRequest};

pub use trading_core::config::ExecutorConfig;

/// Metrics for order execution performance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_failed: u64,
    pub retries: u64,
    pub avg_latency_us: u64,
}

/// Wraps an [`OrderGateway`] with a per-call timeout and exponential backoff
/// on transient failures. Non-retryable failures return immediately.
pub struct OrderExecutor {
    gateway: Arc<dyn OrderGateway>,
    config: ExecutorConfig,
    metrics: RwLock<ExecutionMetrics>,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn OrderGateway>, config: ExecutorConfig) -> Self {
        Self {
            gateway,
            config,
            metrics: RwLock::new(ExecutionMetrics::default()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a market order, retrying transient failures up to `max_retries` times.
    pub async fn execute(&self, request: &OrderRequest) -> Result<Fill, OrderError> {
        let start = Instant::now();
        debug!(
            order_id = %request.id,
            instrument = %request.instrument,
            side = %request.side,
            quantity = %request.quantity,
            "Executing market order"
        );

        let mut attempt: u32 = 0;
        let outcome = loop {
            match self.attempt(request).await {
                Ok(fill) => break Ok(fill),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        order_id = %request.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient order failure, retrying"
                    );
                    self.write_metrics().retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        {
            let mut metrics = self.write_metrics();
            metrics.orders_submitted += 1;
            if outcome.is_ok() {
                metrics.orders_filled += 1;
            } else {
                metrics.orders_failed += 1;
            }
            let latency_us = start.elapsed().as_micros() as u64;
            metrics.avg_latency_us = (metrics.avg_latency_us * (metrics.orders_submitted - 1)
                + latency_us)
                / metrics.orders_submitted;
        }

        match &outcome {
            Ok(fill) => info!(
                order_id = %request.id,
                side = %fill.side,
                price = %fill.price,
                quantity = %fill.quantity,
                latency_us = %start.elapsed().as_micros(),
                "Order filled"
            ),
            Err(e) => warn!(
                order_id = %request.id,
                attempts = attempt + 1,
                error = %e,
                "Order failed"
            ),
        }

        outcome
    }

    async fn attempt(&self, request: &OrderRequest) -> Result<Fill, OrderError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, self.gateway.place_order(request)).await {
            Ok(result) => result,
            Err(_) => Err(OrderError::TransientFailure(format!(
                "gateway timed out after {}ms",
                self.config.timeout_ms
            ))),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.config.retry_base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.config.retry_max_delay_ms))
    }

    /// Get current execution metrics.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_metrics(&self) -> std::sync::RwLockWriteGuard<'_, ExecutionMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}
