//! At-most-once authorization of sell and buy actions.
//!
//! Each guarded action runs in episodes. An episode opens when the position
//! becomes eligible for the action (a sell episode when it starts running, a
//! buy episode when it starts waiting for re-entry) and fires at most once.
//! The caller holds the per-position lock while calling into the guard, so the
//! flags need no synchronization of their own.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardedAction {
    Sell,
    Buy,
}

/// Proof that an action was authorized for a specific episode. Completing or
/// aborting with a ticket from an older episode is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeTicket {
    pub action: GuardedAction,
    pub episode: u64,
}

/// The two-flag episode state of one guarded action.
#[derive(Debug, Clone, Default)]
pub struct ActionGuard {
    episode: u64,
    in_progress: bool,
    fired: bool,
}

impl ActionGuard {
    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    pub fn is_armed(&self) -> bool {
        !self.in_progress && !self.fired
    }

    fn try_fire(&mut self, action: GuardedAction) -> Option<EpisodeTicket> {
        if !self.is_armed() {
            return None;
        }
        self.in_progress = true;
        Some(EpisodeTicket {
            action,
            episode: self.episode,
        })
    }

    fn owns(&self, ticket: &EpisodeTicket) -> bool {
        ticket.episode == self.episode && self.in_progress
    }

    fn complete(&mut self, ticket: &EpisodeTicket) -> bool {
        if !self.owns(ticket) {
            return false;
        }
        self.in_progress = false;
        self.fired = true;
        true
    }

    fn abort(&mut self, ticket: &EpisodeTicket) -> bool {
        if !self.owns(ticket) {
            return false;
        }
        self.in_progress = false;
        true
    }

    /// Open a new episode that may fire.
    fn rearm(&mut self) {
        self.episode += 1;
        self.in_progress = false;
        self.fired = false;
    }

    /// Open a new episode that may not fire. Invalidates outstanding tickets.
    fn disarm(&mut self) {
        self.episode += 1;
        self.in_progress = false;
        self.fired = true;
    }
}

/// Per-position guard over the sell and buy actions.
#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    sell: ActionGuard,
    buy: ActionGuard,
    suppressed: u64,
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGuard {
    /// Guard for a freshly opened, running position: sell armed, buy disarmed.
    pub fn new() -> Self {
        let mut guard = Self {
            sell: ActionGuard::default(),
            buy: ActionGuard::default(),
            suppressed: 0,
        };
        guard.buy.disarm();
        guard
    }

    fn slot(&mut self, action: GuardedAction) -> &mut ActionGuard {
        match action {
            GuardedAction::Sell => &mut self.sell,
            GuardedAction::Buy => &mut self.buy,
        }
    }

    pub fn state(&self, action: GuardedAction) -> &ActionGuard {
        match action {
            GuardedAction::Sell => &self.sell,
            GuardedAction::Buy => &self.buy,
        }
    }

    /// Authorize `action` once per episode. A refused call only bumps the
    /// suppression counter.
    pub fn try_fire(&mut self, action: GuardedAction) -> Option<EpisodeTicket> {
        let ticket = self.slot(action).try_fire(action);
        if ticket.is_none() {
            self.suppressed += 1;
        }
        ticket
    }

    pub fn try_fire_sell(&mut self) -> Option<EpisodeTicket> {
        self.try_fire(GuardedAction::Sell)
    }

    pub fn try_fire_buy(&mut self) -> Option<EpisodeTicket> {
        self.try_fire(GuardedAction::Buy)
    }

    /// The gateway confirmed the action. Returns false for a stale ticket.
    pub fn complete(&mut self, ticket: &EpisodeTicket) -> bool {
        self.slot(ticket.action).complete(ticket)
    }

    /// The gateway gave up; the episode may fire again. Returns false for a stale ticket.
    pub fn abort(&mut self, ticket: &EpisodeTicket) -> bool {
        self.slot(ticket.action).abort(ticket)
    }

    /// Whether `ticket` still belongs to the live episode of its action.
    pub fn is_current(&self, ticket: &EpisodeTicket) -> bool {
        self.state(ticket.action).owns(ticket)
    }

    /// The position was liquidated and now waits for re-entry.
    pub fn begin_reentry(&mut self) {
        self.sell.disarm();
        self.buy.rearm();
    }

    /// The position holds quantity again.
    pub fn begin_running(&mut self) {
        self.buy.disarm();
        self.sell.rearm();
    }

    /// Terminal: nothing may fire and every outstanding ticket goes stale.
    pub fn cancel_all(&mut self) {
        self.sell.disarm();
        self.buy.disarm();
    }

    /// Trigger evaluations refused because the action was in flight or already fired.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sell_fires_once_per_episode() {
        let mut guard = ExecutionGuard::new();
        let ticket = guard.try_fire_sell().unwrap();

        // Same trigger seen again before the gateway answers
        assert!(guard.try_fire_sell().is_none());
        assert!(guard.try_fire_sell().is_none());
        assert_eq!(guard.suppressed(), 2);

        assert!(guard.complete(&ticket));
        // Already fired in this episode
        assert!(guard.try_fire_sell().is_none());
        assert_eq!(guard.suppressed(), 3);
    }

    #[test]
    fn test_new_guard_refuses_buy() {
        let mut guard = ExecutionGuard::new();
        assert!(guard.try_fire_buy().is_none());
        assert!(guard.state(GuardedAction::Sell).is_armed());
    }

    #[test]
    fn test_abort_allows_retry_in_same_episode() {
        let mut guard = ExecutionGuard::new();
        let first = guard.try_fire_sell().unwrap();
        assert!(guard.abort(&first));

        let second = guard.try_fire_sell().unwrap();
        assert_eq!(first.episode, second.episode);
        assert!(guard.complete(&second));
    }

    #[test]
    fn test_cycle_rearms_each_action() {
        let mut guard = ExecutionGuard::new();
        let sell = guard.try_fire_sell().unwrap();
        guard.complete(&sell);

        guard.begin_reentry();
        assert!(guard.try_fire_sell().is_none());
        let buy = guard.try_fire_buy().unwrap();
        assert!(guard.try_fire_buy().is_none());
        guard.complete(&buy);

        guard.begin_running();
        assert!(guard.try_fire_buy().is_none());
        let next_sell = guard.try_fire_sell().unwrap();
        assert!(next_sell.episode > sell.episode);
    }

    #[test]
    fn test_cancel_invalidates_outstanding_ticket() {
        let mut guard = ExecutionGuard::new();
        guard.begin_reentry();
        let buy = guard.try_fire_buy().unwrap();
        assert!(guard.is_current(&buy));

        guard.cancel_all();
        assert!(!guard.is_current(&buy));
        assert!(!guard.complete(&buy));
        assert!(!guard.abort(&buy));
        assert!(guard.try_fire_buy().is_none());
        assert!(guard.try_fire_sell().is_none());
    }

    #[test]
    fn test_stale_ticket_from_previous_episode_is_ignored() {
        let mut guard = ExecutionGuard::new();
        let old = guard.try_fire_sell().unwrap();
        guard.begin_reentry();
        guard.begin_running();

        let fresh = guard.try_fire_sell().unwrap();
        assert!(!guard.complete(&old));
        assert!(guard.state(GuardedAction::Sell).in_progress());
        assert!(guard.complete(&fresh));
    }
}
