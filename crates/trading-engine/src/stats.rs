//! Engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineStats {
    ticks_processed: AtomicU64,
    ticks_ignored: AtomicU64,
    duplicate_triggers: AtomicU64,
    sells_dispatched: AtomicU64,
    buys_dispatched: AtomicU64,
    gateway_failures: AtomicU64,
    cooldowns_engaged: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks_processed: u64,
    /// Stale or duplicate ticks skipped per position.
    pub ticks_ignored: u64,
    /// Trigger evaluations refused by the execution guard.
    pub duplicate_triggers: u64,
    pub sells_dispatched: u64,
    pub buys_dispatched: u64,
    pub gateway_failures: u64,
    pub cooldowns_engaged: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineStats {
    pub fn tick_processed(&self) {
        bump(&self.ticks_processed);
    }

    pub fn tick_ignored(&self) {
        bump(&self.ticks_ignored);
    }

    pub fn duplicate_trigger(&self) {
        bump(&self.duplicate_triggers);
    }

    pub fn sell_dispatched(&self) {
        bump(&self.sells_dispatched);
    }

    pub fn buy_dispatched(&self) {
        bump(&self.buys_dispatched);
    }

    pub fn gateway_failure(&self) {
        bump(&self.gateway_failures);
    }

    pub fn cooldown_engaged(&self) {
        bump(&self.cooldowns_engaged);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            ticks_ignored: self.ticks_ignored.load(Ordering::Relaxed),
            duplicate_triggers: self.duplicate_triggers.load(Ordering::Relaxed),
            sells_dispatched: self.sells_dispatched.load(Ordering::Relaxed),
            buys_dispatched: self.buys_dispatched.load(Ordering::Relaxed),
            gateway_failures: self.gateway_failures.load(Ordering::Relaxed),
            cooldowns_engaged: self.cooldowns_engaged.load(Ordering::Relaxed),
        }
    }
}
