//! Append-only trade event feed.

use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;
use trading_core::types::TradeEvent;
use uuid::Uuid;

/// Every decision the engine makes lands here, in order. Live consumers
/// subscribe to a broadcast channel; the full history stays queryable.
pub struct TradeLog {
    events: RwLock<Vec<TradeEvent>>,
    tx: broadcast::Sender<TradeEvent>,
}

impl TradeLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            events: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Append an event, assigning the next sequence number.
    pub fn record(&self, mut event: TradeEvent) -> TradeEvent {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        event.seq = events.len() as u64 + 1;
        events.push(event.clone());

        debug!(
            seq = event.seq,
            position_id = %event.position_id,
            action = ?event.action,
            price = %event.price,
            reason = %event.reason,
            "Trade event"
        );

        // Sending under the lock keeps the channel in sequence order; no subscribers is fine
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.tx.subscribe()
    }

    pub fn history(&self) -> Vec<TradeEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events with a sequence number greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<TradeEvent> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events.iter().skip(seq as usize).cloned().collect()
    }

    pub fn for_position(&self, position_id: Uuid) -> Vec<TradeEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.position_id == position_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TradeLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use trading_core::types::{TradeAction, TradeReason};

    fn event(position_id: Uuid, action: TradeAction) -> TradeEvent {
        TradeEvent::new(
            position_id,
            action,
            Decimal::new(100, 0),
            Decimal::new(75, 0),
            Decimal::ZERO,
            TradeReason::ManualEntry,
        )
    }

    #[test]
    fn test_sequence_numbers_and_queries() {
        let log = TradeLog::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(log.record(event(a, TradeAction::ManualBuy)).seq, 1);
        assert_eq!(log.record(event(b, TradeAction::ManualBuy)).seq, 2);
        assert_eq!(log.record(event(a, TradeAction::AutoSell)).seq, 3);

        assert_eq!(log.len(), 3);
        assert_eq!(log.for_position(a).len(), 2);
        let tail = log.since(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 2);
    }

    #[tokio::test]
    async fn test_subscribers_receive_live_events() {
        let log = TradeLog::new(16);
        let mut rx = log.subscribe();
        let id = Uuid::new_v4();

        log.record(event(id, TradeAction::ManualBuy));
        log.record(event(id, TradeAction::ManualSell));

        assert_eq!(rx.recv().await.unwrap().action, TradeAction::ManualBuy);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
    }
}
