//! Tick worker pool.
//!
//! Ticks are routed to a worker by a hash of their instrument key, so ticks
//! for one instrument are evaluated in arrival order while different
//! instruments proceed in parallel.

use crate::error::{EngineError, Result};
use crate::position_store::PositionStore;
use futures_util::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trading_core::config::EngineConfig;
use trading_core::types::{InstrumentKey, PriceTick};

enum WorkerMessage {
    Tick(PriceTick),
    /// Acknowledged once every message queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

pub struct TickDispatcher {
    senders: Vec<mpsc::Sender<WorkerMessage>>,
    workers: Vec<JoinHandle<()>>,
    store: Arc<PositionStore>,
}

impl TickDispatcher {
    /// Start `workers` tick workers, each with a bounded queue of `capacity`.
    pub fn spawn(store: Arc<PositionStore>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(index, Arc::clone(&store), rx)));
        }

        info!(workers, capacity, "Tick dispatcher started");
        Self {
            senders,
            workers: handles,
            store,
        }
    }

    pub fn from_config(store: Arc<PositionStore>, config: &EngineConfig) -> Self {
        Self::spawn(store, config.workers, config.queue_capacity)
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Worker index for `instrument`. Stable for the lifetime of the dispatcher.
    pub fn route(&self, instrument: &InstrumentKey) -> usize {
        let mut hasher = DefaultHasher::new();
        instrument.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue a tick, waiting for room when the worker is backed up.
    pub async fn dispatch(&self, tick: PriceTick) -> Result<()> {
        let worker = self.route(&tick.instrument);
        self.senders[worker]
            .send(WorkerMessage::Tick(tick))
            .await
            .map_err(|_| EngineError::DispatcherClosed)
    }

    /// Wait until every tick queued so far has been evaluated and every order
    /// those ticks spawned has completed.
    pub async fn flush(&self) -> Result<()> {
        let mut acks = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            let (tx, rx) = oneshot::channel();
            sender
                .send(WorkerMessage::Flush(tx))
                .await
                .map_err(|_| EngineError::DispatcherClosed)?;
            acks.push(rx);
        }
        for ack in join_all(acks).await {
            ack.map_err(|_| EngineError::DispatcherClosed)?;
        }
        self.store.settle().await;
        Ok(())
    }

    /// Stop accepting ticks, drain the queues, and wait for in-flight orders.
    pub async fn shutdown(self) {
        drop(self.senders);
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Tick worker ended abnormally");
            }
        }
        self.store.settle().await;
        info!("Tick dispatcher stopped");
    }
}

async fn run_worker(index: usize, store: Arc<PositionStore>, mut rx: mpsc::Receiver<WorkerMessage>) {
    debug!(worker = index, "Tick worker started");
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Tick(tick) => store.on_tick(&tick).await,
            WorkerMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!(worker = index, "Tick worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PaperGateway;
    use chrono::{Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;
    use trading_core::config::Config;
    use trading_core::types::{OptionType, PositionMode, StrategyKind};

    fn instrument(strike: i64) -> InstrumentKey {
        InstrumentKey::new(
            "NIFTY",
            NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            Decimal::new(strike, 0),
            OptionType::Call,
        )
    }

    fn store() -> Arc<PositionStore> {
        let mut config = Config::default();
        config.engine.default_strategy = StrategyKind::Simple;
        PositionStore::new(&config, Arc::new(PaperGateway::new(Decimal::new(10_000_000, 0)))).unwrap()
    }

    #[tokio::test]
    async fn test_routing_is_stable() {
        let dispatcher = TickDispatcher::spawn(store(), 4, 16);
        let key = instrument(24500);
        let first = dispatcher.route(&key);
        assert!(first < dispatcher.worker_count());
        assert_eq!(dispatcher.route(&key.clone()), first);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_ticks_for_one_instrument_keep_order() {
        let store = store();
        let position = store
            .manual_buy(instrument(24500), Decimal::new(100, 0), Decimal::new(75, 0))
            .await
            .unwrap();
        let dispatcher = TickDispatcher::spawn(Arc::clone(&store), 3, 4);

        // Rising path queued faster than the worker drains it; evaluated in order
        let start = Utc::now();
        for (i, price) in (101..=160).enumerate() {
            let tick = PriceTick::new(
                instrument(24500),
                Decimal::new(price, 0),
                start + Duration::milliseconds(i as i64 + 1),
            );
            dispatcher.dispatch(tick).await.unwrap();
        }
        dispatcher.flush().await.unwrap();

        let view = store.get(position.id).await.unwrap();
        assert_eq!(view.position.mode, PositionMode::Running);
        assert_eq!(view.position.highest_price, Decimal::new(160, 0));
        assert_eq!(view.position.stop_loss_price, Decimal::new(150, 0));
        assert_eq!(store.stats().ticks_ignored, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_independent_instruments() {
        let store = store();
        let a = store
            .manual_buy(instrument(24500), Decimal::new(100, 0), Decimal::new(75, 0))
            .await
            .unwrap();
        let b = store
            .manual_buy(instrument(24600), Decimal::new(100, 0), Decimal::new(75, 0))
            .await
            .unwrap();
        let dispatcher = TickDispatcher::spawn(Arc::clone(&store), 2, 8);

        let now = Utc::now();
        dispatcher
            .dispatch(PriceTick::new(instrument(24500), Decimal::new(85, 0), now))
            .await
            .unwrap();
        dispatcher
            .dispatch(PriceTick::new(instrument(24600), Decimal::new(125, 0), now))
            .await
            .unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(store.get(a.id).await.unwrap().position.mode, PositionMode::WaitingReentry);
        let b = store.get(b.id).await.unwrap();
        assert_eq!(b.position.mode, PositionMode::Running);
        assert_eq!(b.position.stop_loss_price, Decimal::new(110, 0));
        dispatcher.shutdown().await;
    }
}
