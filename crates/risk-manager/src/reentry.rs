//! Re-entry trigger placement and the cooldown that widens it after repeated cycles.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trading_core::config::RiskConfig;
use trading_core::types::{Phase, StrategyKind};

/// Where and how a liquidated position waits to be bought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReEntryPlan {
    pub trigger_price: Decimal,
    pub cooldown: bool,
    /// Counter to store on the position; reset to zero when cooldown engages.
    pub auto_buy_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ReEntryScheduler {
    threshold: u32,
    buffer: Decimal,
    enabled: bool,
}

impl ReEntryScheduler {
    pub fn new(threshold: u32, buffer: Decimal, enabled: bool) -> Self {
        Self {
            threshold,
            buffer,
            enabled,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(
            config.cooldown_threshold,
            config.cooldown_buffer,
            config.cooldown_enabled,
        )
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn buffer(&self) -> Decimal {
        self.buffer
    }

    /// Trigger before any cooldown. A phased position sold in phase 1 is only
    /// bought back once price recovers to the opening manual entry, however
    /// many re-entries happened since; everything else re-enters at the sell
    /// price.
    pub fn base_trigger(
        &self,
        strategy: StrategyKind,
        phase: Option<Phase>,
        manual_entry_price: Decimal,
        sell_price: Decimal,
    ) -> Decimal {
        match (strategy, phase) {
            (StrategyKind::Phased, Some(Phase::One)) => manual_entry_price,
            _ => sell_price,
        }
    }

    /// Plan re-entry after a confirmed sell.
    pub fn plan(
        &self,
        strategy: StrategyKind,
        phase: Option<Phase>,
        manual_entry_price: Decimal,
        sell_price: Decimal,
        auto_buy_count: u32,
        position_cooldown_enabled: bool,
    ) -> ReEntryPlan {
        let trigger_price = self.base_trigger(strategy, phase, manual_entry_price, sell_price);

        if self.enabled && position_cooldown_enabled && auto_buy_count >= self.threshold {
            return ReEntryPlan {
                trigger_price: trigger_price + self.buffer,
                cooldown: true,
                auto_buy_count: 0,
            };
        }

        ReEntryPlan {
            trigger_price,
            cooldown: false,
            auto_buy_count,
        }
    }

    /// Counter after a completed auto-buy.
    pub fn record_auto_buy(&self, auto_buy_count: u32) -> u32 {
        auto_buy_count.saturating_add(1)
    }

    pub fn is_triggered(&self, trigger_price: Decimal, price: Decimal) -> bool {
        price >= trigger_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    fn scheduler() -> ReEntryScheduler {
        ReEntryScheduler::from_config(&RiskConfig::default())
    }

    #[test]
    fn test_phase_one_reenters_at_entry() {
        let s = scheduler();
        let plan = s.plan(StrategyKind::Phased, Some(Phase::One), d(100), d(90), 0, true);
        assert_eq!(plan.trigger_price, d(100));
        assert!(!plan.cooldown);
    }

    #[test]
    fn test_later_phases_and_simple_reenter_at_sell_price() {
        let s = scheduler();
        let phased = s.plan(StrategyKind::Phased, Some(Phase::Three), d(100), d(157), 0, true);
        assert_eq!(phased.trigger_price, d(157));

        let simple = s.plan(StrategyKind::Simple, None, d(100), d(110), 2, true);
        assert_eq!(simple.trigger_price, d(110));
        assert_eq!(simple.auto_buy_count, 2);
    }

    #[test]
    fn test_cooldown_engages_at_threshold() {
        let s = scheduler();
        let mut count = 0;
        for _ in 0..5 {
            let plan = s.plan(StrategyKind::Simple, None, d(100), d(99), count, true);
            assert!(!plan.cooldown);
            count = s.record_auto_buy(plan.auto_buy_count);
        }
        assert_eq!(count, 5);

        let plan = s.plan(StrategyKind::Simple, None, d(100), d(99), count, true);
        assert!(plan.cooldown);
        assert_eq!(plan.trigger_price, d(104));
        assert_eq!(plan.auto_buy_count, 0);
    }

    #[test]
    fn test_cooldown_needs_both_switches() {
        let global_off = ReEntryScheduler::new(5, d(5), false);
        let plan = global_off.plan(StrategyKind::Simple, None, d(100), d(99), 7, true);
        assert!(!plan.cooldown);
        assert_eq!(plan.trigger_price, d(99));
        assert_eq!(plan.auto_buy_count, 7);

        let plan = scheduler().plan(StrategyKind::Simple, None, d(100), d(99), 7, false);
        assert!(!plan.cooldown);
    }

    #[test]
    fn test_trigger_comparison_is_inclusive() {
        let s = scheduler();
        assert!(s.is_triggered(d(104), d(104)));
        assert!(!s.is_triggered(d(104), Decimal::new(10399, 2)));
    }
}
