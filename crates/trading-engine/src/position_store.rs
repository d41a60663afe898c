//! Authoritative position records and the per-tick state machine.
//!
//! Every position sits behind its own async mutex. The instrument index and the
//! position map are only touched to insert, remove, or clone out a record
//! handle. Gateway calls are spawned off the tick path; their completion takes
//! the position lock again and finalizes the transition.

use crate::error::{EngineError, Result};
use crate::executor::{ExecutionMetrics, OrderExecutor};
use crate::gateway::OrderGateway;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::trade_log::TradeLog;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use risk_manager::{
    EpisodeTicket, ExecutionGuard, ManualOverrideHandler, OverrideKind, OverrideStatus,
    ReEntryScheduler, TrailState, TrailingStopCalculator,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use trading_core::config::Config;
use trading_core::types::{
    Fill, InstrumentKey, OrderError, OrderRequest, Phase, Position, PositionMode, PriceTick,
    StrategyKind, TradeAction, TradeEvent, TradeReason,
};
use uuid::Uuid;

struct PositionRecord {
    position: Position,
    guard: ExecutionGuard,
    /// Timestamp and price of the last tick evaluated, for duplicate detection.
    last_tick: Option<(DateTime<Utc>, Decimal)>,
    /// A manual sell arrived while an automatic sell was in flight. Survives a
    /// failed sell until the close is re-issued and completes.
    close_requested: bool,
}

impl PositionRecord {
    fn new(position: Position) -> Self {
        Self {
            position,
            guard: ExecutionGuard::new(),
            last_tick: None,
            close_requested: false,
        }
    }
}

type SharedRecord = Arc<Mutex<PositionRecord>>;

/// Read-only view of a position for queries.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    /// Exit level currently in force: the override target while one is
    /// active, the trailing stop otherwise.
    pub effective_stop: Decimal,
    pub override_kind: Option<OverrideKind>,
    /// A manual close was requested but has not completed yet.
    pub close_pending: bool,
    pub suppressed_triggers: u64,
    pub status: String,
}

struct SellJob {
    ticket: EpisodeTicket,
    request: OrderRequest,
    reason: TradeReason,
    /// Phase when the sell fired; decides where re-entry is anchored.
    phase: Option<Phase>,
}

struct BuyJob {
    ticket: EpisodeTicket,
    request: OrderRequest,
}

pub struct PositionStore {
    positions: DashMap<Uuid, SharedRecord>,
    by_instrument: DashMap<InstrumentKey, Vec<Uuid>>,
    calculator: TrailingStopCalculator,
    overrides: ManualOverrideHandler,
    scheduler: ReEntryScheduler,
    executor: Arc<OrderExecutor>,
    trade_log: Arc<TradeLog>,
    stats: EngineStats,
    default_strategy: StrategyKind,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl PositionStore {
    pub fn new(config: &Config, gateway: Arc<dyn OrderGateway>) -> Result<Arc<Self>> {
        let executor = Arc::new(OrderExecutor::new(gateway, config.executor.clone()));
        let trade_log = Arc::new(TradeLog::new(config.engine.event_capacity));

        Ok(Arc::new(Self {
            positions: DashMap::new(),
            by_instrument: DashMap::new(),
            calculator: TrailingStopCalculator::new(&config.risk)?,
            overrides: ManualOverrideHandler::from_config(&config.risk),
            scheduler: ReEntryScheduler::from_config(&config.risk),
            executor,
            trade_log,
            stats: EngineStats::default(),
            default_strategy: config.engine.default_strategy,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }))
    }

    pub fn trade_log(&self) -> &Arc<TradeLog> {
        &self.trade_log
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn executor_metrics(&self) -> ExecutionMetrics {
        self.executor.metrics()
    }

    /// Gateway calls spawned by tick evaluation that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every spawned gateway call has completed, including follow-ups
    /// those completions spawn.
    pub async fn settle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, id: &Uuid) -> Option<SharedRecord> {
        self.positions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn unindex(&self, instrument: &InstrumentKey, id: Uuid) {
        if let Some(mut ids) = self.by_instrument.get_mut(instrument) {
            ids.retain(|other| *other != id);
        }
        self.by_instrument.remove_if(instrument, |_, ids| ids.is_empty());
    }

    fn spawn_action<F>(self: &Arc<Self>, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let store = Arc::clone(self);
        tokio::spawn(async move {
            action.await;
            if store.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                store.idle.notify_waiters();
            }
        });
    }

    // Manual commands

    /// Open a position with the default strategy. The buy is executed before
    /// the position exists, so a failed buy leaves nothing behind.
    pub async fn manual_buy(
        &self,
        instrument: InstrumentKey,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<Position> {
        self.manual_buy_with_strategy(instrument, price, quantity, self.default_strategy)
            .await
    }

    pub async fn manual_buy_with_strategy(
        &self,
        instrument: InstrumentKey,
        price: Decimal,
        quantity: Decimal,
        strategy: StrategyKind,
    ) -> Result<Position> {
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(price));
        }
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(quantity));
        }

        let request = OrderRequest::buy(instrument.clone(), quantity, price);
        let fill = self.executor.execute(&request).await.inspect_err(|e| {
            warn!(instrument = %instrument, error = %e, "Manual buy failed");
        })?;

        let position = Position::open(
            instrument.clone(),
            strategy,
            fill.price,
            fill.quantity,
            self.calculator.step(),
        );
        let id = position.id;

        self.trade_log.record(TradeEvent::new(
            id,
            TradeAction::ManualBuy,
            fill.price,
            fill.quantity,
            Decimal::ZERO,
            TradeReason::ManualEntry,
        ));
        self.positions
            .insert(id, Arc::new(Mutex::new(PositionRecord::new(position.clone()))));
        self.by_instrument.entry(instrument).or_default().push(id);

        info!(
            position_id = %id,
            instrument = %position.instrument,
            strategy = %strategy,
            entry = %position.entry_price,
            stop = %position.stop_loss_price,
            "Position opened"
        );
        Ok(position)
    }

    /// Close a position for good. Holdings are sold first; a pending re-entry is
    /// cancelled in the same critical section as the close.
    pub async fn manual_sell(&self, id: Uuid) -> Result<Position> {
        let record = self.record(&id).ok_or(EngineError::PositionNotFound(id))?;
        let mut rec = record.lock().await;

        let (ticket, request) = match rec.position.mode {
            PositionMode::ManuallyClosed => return Err(EngineError::AlreadyClosed(id)),
            PositionMode::WaitingReentry | PositionMode::Cooldown => {
                let price = rec.position.current_price;
                self.finish_close(&mut rec)?;
                self.trade_log.record(TradeEvent::notice(
                    id,
                    TradeAction::ManualClose,
                    price,
                    TradeReason::ManualExit,
                ));
                info!(position_id = %id, "Position closed, pending re-entry cancelled");
                return Ok(rec.position.clone());
            }
            PositionMode::SellInProgress => {
                rec.close_requested = true;
                info!(position_id = %id, "Close deferred until the in-flight sell settles");
                return Ok(rec.position.clone());
            }
            PositionMode::Running | PositionMode::ActionFailed => {
                let Some(ticket) = rec.guard.try_fire_sell() else {
                    rec.close_requested = true;
                    return Ok(rec.position.clone());
                };
                if let Err(e) = rec.position.begin_sell() {
                    rec.guard.abort(&ticket);
                    return Err(e.into());
                }
                let request = OrderRequest::sell(
                    rec.position.instrument.clone(),
                    rec.position.quantity,
                    rec.position.current_price,
                );
                (ticket, request)
            }
        };
        drop(rec);

        info!(position_id = %id, price = %request.reference_price, "Manual sell");
        let outcome = self.executor.execute(&request).await;

        let mut rec = record.lock().await;
        match outcome {
            Ok(fill) => {
                rec.guard.complete(&ticket);
                let pnl = rec.position.settle_sell(fill.price)?;
                self.trade_log.record(TradeEvent::new(
                    id,
                    TradeAction::ManualSell,
                    fill.price,
                    fill.quantity,
                    pnl,
                    TradeReason::ManualExit,
                ));
                self.finish_close(&mut rec)?;
                info!(position_id = %id, pnl = %pnl, "Position closed");
                Ok(rec.position.clone())
            }
            Err(e) => {
                self.fail_sell(&mut rec, &ticket, request.reference_price, &e);
                Err(EngineError::Gateway(e))
            }
        }
    }

    /// Replace any override on the position. Invalid targets are rejected
    /// without touching the position.
    pub async fn set_manual_override(&self, id: Uuid, target_price: Decimal) -> Result<Position> {
        self.set_manual_override_at(id, target_price, Utc::now()).await
    }

    /// Like [`set_manual_override`](Self::set_manual_override) with an explicit
    /// start of the override lifetime, for replayed feeds.
    pub async fn set_manual_override_at(
        &self,
        id: Uuid,
        target_price: Decimal,
        set_at: DateTime<Utc>,
    ) -> Result<Position> {
        let manual = self.overrides.new_override(target_price, set_at)?;
        let record = self.record(&id).ok_or(EngineError::PositionNotFound(id))?;
        let mut rec = record.lock().await;
        if rec.position.is_closed() {
            return Err(EngineError::AlreadyClosed(id));
        }
        if rec.position.mode.awaiting_reentry() {
            return Err(EngineError::NothingHeld(id));
        }

        rec.position.manual_override = Some(manual);
        rec.position.updated_at = Utc::now();
        info!(position_id = %id, target = %target_price, "Manual override set");
        Ok(rec.position.clone())
    }

    pub async fn clear_override(&self, id: Uuid) -> Result<Position> {
        let record = self.record(&id).ok_or(EngineError::PositionNotFound(id))?;
        let mut rec = record.lock().await;
        if rec.position.manual_override.take().is_some() {
            rec.position.updated_at = Utc::now();
            info!(position_id = %id, "Manual override cleared");
        }
        Ok(rec.position.clone())
    }

    pub async fn set_cooldown_enabled(&self, id: Uuid, enabled: bool) -> Result<Position> {
        let record = self.record(&id).ok_or(EngineError::PositionNotFound(id))?;
        let mut rec = record.lock().await;
        if rec.position.is_closed() {
            return Err(EngineError::AlreadyClosed(id));
        }
        rec.position.cooldown_enabled = enabled;
        rec.position.updated_at = Utc::now();
        Ok(rec.position.clone())
    }

    // Queries

    pub async fn get(&self, id: Uuid) -> Option<PositionView> {
        let record = self.record(&id)?;
        let rec = record.lock().await;
        Some(self.view(&rec, Utc::now()))
    }

    /// All positions, closed ones included, oldest first.
    pub async fn snapshot(&self) -> Vec<PositionView> {
        let records: Vec<SharedRecord> = self
            .positions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let now = Utc::now();

        let mut views = Vec::with_capacity(records.len());
        for record in records {
            let rec = record.lock().await;
            views.push(self.view(&rec, now));
        }
        views.sort_by_key(|v| v.position.opened_at);
        views
    }

    /// Open positions on `instrument`.
    pub async fn positions_for(&self, instrument: &InstrumentKey) -> Vec<PositionView> {
        let ids = match self.by_instrument.get(instrument) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let now = Utc::now();

        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.record(&id) {
                let rec = record.lock().await;
                views.push(self.view(&rec, now));
            }
        }
        views
    }

    fn view(&self, rec: &PositionRecord, now: DateTime<Utc>) -> PositionView {
        let position = &rec.position;
        let status =
            self.overrides
                .apply(position.manual_override.as_ref(), position.entry_price, now);
        let (effective_stop, override_kind) = match status {
            OverrideStatus::Active { target, kind } if position.quantity > Decimal::ZERO => {
                (target, Some(kind))
            }
            _ => (position.stop_loss_price, None),
        };

        PositionView {
            position: position.clone(),
            effective_stop,
            override_kind,
            close_pending: rec.close_requested,
            suppressed_triggers: rec.guard.suppressed(),
            status: position.status_message(),
        }
    }

    // Tick evaluation

    /// Evaluate one tick against every open position on its instrument.
    /// Positions are evaluated one at a time and never affect each other.
    pub async fn on_tick(self: &Arc<Self>, tick: &PriceTick) {
        self.stats.tick_processed();
        if !tick.is_valid() {
            warn!(instrument = %tick.instrument, ltp = %tick.ltp, "Ignoring tick with non-positive price");
            self.stats.tick_ignored();
            return;
        }

        let ids = match self.by_instrument.get(&tick.instrument) {
            Some(ids) => ids.clone(),
            None => return,
        };
        for id in ids {
            if let Some(record) = self.record(&id) {
                self.evaluate(&record, tick).await;
            }
        }
    }

    async fn evaluate(self: &Arc<Self>, record: &SharedRecord, tick: &PriceTick) {
        let mut rec = record.lock().await;
        if rec.position.is_closed() {
            return;
        }
        let id = rec.position.id;

        if let Some((last_at, last_price)) = rec.last_tick {
            let duplicate = tick.timestamp == last_at && tick.ltp == last_price;
            if tick.timestamp < last_at || duplicate {
                debug!(position_id = %id, ltp = %tick.ltp, "Skipping stale or duplicate tick");
                self.stats.tick_ignored();
                return;
            }
        }
        rec.last_tick = Some((tick.timestamp, tick.ltp));
        rec.position.current_price = tick.ltp;
        rec.position.last_tick_at = Some(tick.timestamp);
        rec.position.updated_at = Utc::now();

        let mut status = self.overrides.apply(
            rec.position.manual_override.as_ref(),
            rec.position.entry_price,
            tick.timestamp,
        );
        if status == OverrideStatus::Expired {
            info!(position_id = %id, "Manual override expired");
            rec.position.manual_override = None;
            status = OverrideStatus::Inactive;
        }

        // Trail whenever quantity is held, including while a sell is in flight
        if rec.position.quantity > Decimal::ZERO {
            let next = self.calculator.evaluate(
                rec.position.strategy,
                &TrailState::of(&rec.position),
                tick.ltp,
            );
            next.write_to(&mut rec.position);
        }

        match rec.position.mode {
            PositionMode::Running | PositionMode::SellInProgress => {
                if let Some(reason) = Self::sell_trigger(&rec.position, status, tick.ltp) {
                    self.fire_sell(record, &mut rec, tick.ltp, reason);
                }
            }
            PositionMode::WaitingReentry | PositionMode::Cooldown => {
                let triggered = rec
                    .position
                    .re_entry_trigger_price
                    .is_some_and(|trigger| self.scheduler.is_triggered(trigger, tick.ltp));
                if triggered {
                    self.fire_buy(record, &mut rec, tick.ltp);
                }
            }
            PositionMode::ActionFailed | PositionMode::ManuallyClosed => {}
        }
    }

    fn sell_trigger(position: &Position, status: OverrideStatus, price: Decimal) -> Option<TradeReason> {
        match status {
            OverrideStatus::Active { kind, .. } => {
                status.is_triggered(price).then_some(match kind {
                    OverrideKind::TakeProfit => TradeReason::ManualProfitTarget,
                    OverrideKind::StopLoss => TradeReason::ManualStopLoss,
                })
            }
            OverrideStatus::Inactive | OverrideStatus::Expired => {
                (price <= position.stop_loss_price).then(|| {
                    if position.stop_loss_price > position.entry_price {
                        TradeReason::TrailingStopProfit
                    } else {
                        TradeReason::StopLoss
                    }
                })
            }
        }
    }

    fn fire_sell(
        self: &Arc<Self>,
        record: &SharedRecord,
        rec: &mut PositionRecord,
        price: Decimal,
        reason: TradeReason,
    ) {
        let id = rec.position.id;
        let Some(ticket) = rec.guard.try_fire_sell() else {
            self.stats.duplicate_trigger();
            debug!(position_id = %id, price = %price, "Sell already in flight");
            return;
        };
        if let Err(e) = rec.position.begin_sell() {
            rec.guard.abort(&ticket);
            error!(position_id = %id, error = %e, "Sell authorized in unexpected mode");
            return;
        }

        let request = OrderRequest::sell(rec.position.instrument.clone(), rec.position.quantity, price);
        info!(
            position_id = %id,
            price = %price,
            stop = %rec.position.stop_loss_price,
            reason = %reason,
            "Sell triggered"
        );
        self.stats.sell_dispatched();

        let job = SellJob {
            ticket,
            request,
            reason,
            phase: rec.position.phase,
        };
        let store = Arc::clone(self);
        let record = Arc::clone(record);
        self.spawn_action(async move { store.complete_sell(record, job).await });
    }

    async fn complete_sell(&self, record: SharedRecord, job: SellJob) {
        let outcome = self.executor.execute(&job.request).await;
        let mut rec = record.lock().await;
        let id = rec.position.id;

        if !rec.guard.is_current(&job.ticket) {
            warn!(position_id = %id, outcome = ?outcome, "Sell result arrived for a cancelled episode");
            return;
        }

        match outcome {
            Ok(fill) => self.settle_auto_sell(&mut rec, fill, job),
            Err(e) => self.fail_sell(&mut rec, &job.ticket, job.request.reference_price, &e),
        }
    }

    fn settle_auto_sell(&self, rec: &mut PositionRecord, fill: Fill, job: SellJob) {
        let id = rec.position.id;
        rec.guard.complete(&job.ticket);
        let pnl = match rec.position.settle_sell(fill.price) {
            Ok(pnl) => pnl,
            Err(e) => {
                error!(position_id = %id, error = %e, "Cannot settle sell");
                return;
            }
        };
        rec.position.auto_sell_count += 1;
        self.trade_log.record(TradeEvent::new(
            id,
            TradeAction::AutoSell,
            fill.price,
            fill.quantity,
            pnl,
            job.reason,
        ));

        if rec.close_requested {
            if let Err(e) = self.finish_close(rec) {
                error!(position_id = %id, error = %e, "Cannot close after sell");
                return;
            }
            self.trade_log.record(TradeEvent::notice(
                id,
                TradeAction::ManualClose,
                fill.price,
                TradeReason::ManualExit,
            ));
            info!(position_id = %id, "Deferred manual close completed");
            return;
        }

        let plan = self.scheduler.plan(
            rec.position.strategy,
            job.phase,
            rec.position.manual_entry_price,
            fill.price,
            rec.position.auto_buy_count,
            rec.position.cooldown_enabled,
        );
        rec.position.auto_buy_count = plan.auto_buy_count;
        if let Err(e) = rec.position.await_reentry(plan.trigger_price, plan.cooldown) {
            error!(position_id = %id, error = %e, "Cannot schedule re-entry");
            return;
        }
        rec.guard.begin_reentry();

        if plan.cooldown {
            self.stats.cooldown_engaged();
            self.trade_log.record(TradeEvent::notice(
                id,
                TradeAction::CooldownEngaged,
                plan.trigger_price,
                TradeReason::Cooldown {
                    next_trigger: plan.trigger_price,
                },
            ));
        }
        info!(
            position_id = %id,
            fill = %fill.price,
            pnl = %pnl,
            trigger = %plan.trigger_price,
            cooldown = plan.cooldown,
            "Sold, waiting for re-entry"
        );
    }

    fn fail_sell(&self, rec: &mut PositionRecord, ticket: &EpisodeTicket, price: Decimal, e: &OrderError) {
        let id = rec.position.id;
        rec.guard.abort(ticket);
        self.stats.gateway_failure();

        if let Err(te) = rec.position.fail_sell(e.to_string()) {
            error!(position_id = %id, error = %te, "Cannot mark sell as failed");
        }
        let reason = if rec.close_requested {
            TradeReason::ManualExit
        } else {
            TradeReason::Gateway(e.to_string())
        };
        self.trade_log.record(TradeEvent::notice(id, TradeAction::SellFailed, price, reason));
        if rec.close_requested {
            error!(position_id = %id, error = %e, "Sell failed, manual close still pending");
        } else {
            error!(position_id = %id, error = %e, "Sell failed, quantity still held");
        }
    }

    fn fire_buy(self: &Arc<Self>, record: &SharedRecord, rec: &mut PositionRecord, price: Decimal) {
        let id = rec.position.id;
        let Some(ticket) = rec.guard.try_fire_buy() else {
            self.stats.duplicate_trigger();
            debug!(position_id = %id, price = %price, "Re-entry already in flight");
            return;
        };

        let request = OrderRequest::buy(rec.position.instrument.clone(), rec.position.lot_quantity, price);
        info!(
            position_id = %id,
            price = %price,
            trigger = ?rec.position.re_entry_trigger_price,
            "Re-entry triggered"
        );
        self.stats.buy_dispatched();

        let job = BuyJob { ticket, request };
        let store = Arc::clone(self);
        let record = Arc::clone(record);
        self.spawn_action(async move { store.complete_buy(record, job).await });
    }

    async fn complete_buy(self: Arc<Self>, record: SharedRecord, job: BuyJob) {
        let outcome = self.executor.execute(&job.request).await;
        let mut rec = record.lock().await;
        let id = rec.position.id;
        let cancelled = !rec.guard.is_current(&job.ticket) || rec.position.is_closed();

        match outcome {
            Ok(fill) if cancelled => {
                warn!(position_id = %id, price = %fill.price, "Re-entry filled after close, unwinding");
                self.trade_log.record(TradeEvent::new(
                    id,
                    TradeAction::AutoBuy,
                    fill.price,
                    fill.quantity,
                    Decimal::ZERO,
                    TradeReason::FillAfterClose,
                ));
                let instrument = rec.position.instrument.clone();
                drop(rec);

                let store = Arc::clone(&self);
                self.spawn_action(async move { store.unwind_fill(record, instrument, fill).await });
            }
            Ok(fill) => {
                rec.guard.complete(&job.ticket);
                if let Err(e) = rec.position.settle_reentry(&fill) {
                    error!(position_id = %id, error = %e, "Cannot settle re-entry");
                    return;
                }
                rec.position.auto_buy_count = self.scheduler.record_auto_buy(rec.position.auto_buy_count);
                let anchored = self.calculator.reanchor(
                    rec.position.strategy,
                    &TrailState::of(&rec.position),
                    fill.price,
                );
                anchored.write_to(&mut rec.position);
                rec.guard.begin_running();

                self.trade_log.record(TradeEvent::new(
                    id,
                    TradeAction::AutoBuy,
                    fill.price,
                    fill.quantity,
                    Decimal::ZERO,
                    TradeReason::ReEntry,
                ));
                info!(
                    position_id = %id,
                    entry = %fill.price,
                    stop = %rec.position.stop_loss_price,
                    auto_buys = rec.position.auto_buy_count,
                    "Re-entered"
                );
            }
            Err(e) => {
                self.stats.gateway_failure();
                if !cancelled {
                    rec.guard.abort(&job.ticket);
                    rec.position.failure_reason = Some(e.to_string());
                }
                self.trade_log.record(TradeEvent::notice(
                    id,
                    TradeAction::BuyFailed,
                    job.request.reference_price,
                    TradeReason::Gateway(e.to_string()),
                ));
                warn!(position_id = %id, error = %e, "Re-entry buy failed, still waiting");
            }
        }
    }

    /// Sell back a re-entry fill that landed after the position was closed.
    async fn unwind_fill(&self, record: SharedRecord, instrument: InstrumentKey, bought: Fill) {
        let request = OrderRequest::sell(instrument, bought.quantity, bought.price);
        let outcome = self.executor.execute(&request).await;
        let mut rec = record.lock().await;
        let id = rec.position.id;

        match outcome {
            Ok(sold) => {
                let pnl = (sold.price - bought.price) * sold.quantity;
                rec.position.realized_pnl += pnl;
                self.trade_log.record(TradeEvent::new(
                    id,
                    TradeAction::AutoSell,
                    sold.price,
                    sold.quantity,
                    pnl,
                    TradeReason::FillAfterClose,
                ));
                info!(position_id = %id, pnl = %pnl, "Late re-entry fill unwound");
            }
            Err(e) => {
                self.stats.gateway_failure();
                self.trade_log.record(TradeEvent::notice(
                    id,
                    TradeAction::SellFailed,
                    bought.price,
                    TradeReason::Gateway(e.to_string()),
                ));
                error!(
                    position_id = %id,
                    quantity = %bought.quantity,
                    error = %e,
                    "Could not unwind late re-entry fill, quantity left at broker"
                );
            }
        }
    }

    fn finish_close(&self, rec: &mut PositionRecord) -> Result<()> {
        rec.position.close_manually()?;
        rec.guard.cancel_all();
        rec.close_requested = false;
        self.unindex(&rec.position.instrument, rec.position.id);
        Ok(())
    }
}
