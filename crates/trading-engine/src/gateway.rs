//! Order gateway boundary and the paper-trading implementation.

use async_trait::async_trait;
use dashmap::DashSet;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trading_core::config::PaperConfig;
use trading_core::types::{Fill, OrderError, OrderRequest, OrderSide};

/// Executes market orders against a broker.
///
/// Implementations translate the instrument key to whatever identifier the
/// broker uses. A call may be slow; the engine never awaits one while holding
/// a position lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, OrderError>;
}

/// Simulated broker with a virtual wallet. Orders fill in full at the
/// request's reference price.
pub struct PaperGateway {
    balance: Mutex<Decimal>,
    blocked_symbols: DashSet<String>,
    latency: Option<Duration>,
    orders_placed: AtomicU64,
}

impl PaperGateway {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(starting_balance),
            blocked_symbols: DashSet::new(),
            latency: None,
            orders_placed: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PaperConfig) -> Self {
        Self::new(config.starting_balance)
    }

    /// Delay every fill, to exercise the engine with a slow broker.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject every order for `symbol` with `SymbolInvalid`.
    pub fn block_symbol(&self, symbol: impl Into<String>) {
        self.blocked_symbols.insert(symbol.into());
    }

    pub fn unblock_symbol(&self, symbol: &str) {
        self.blocked_symbols.remove(symbol);
    }

    pub async fn balance(&self) -> Decimal {
        *self.balance.lock().await
    }

    /// Orders that reached the wallet, filled or not.
    pub fn orders_placed(&self) -> u64 {
        self.orders_placed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, OrderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.orders_placed.fetch_add(1, Ordering::Relaxed);

        if self.blocked_symbols.contains(&request.instrument.symbol) {
            warn!(instrument = %request.instrument, "[PAPER] Symbol blocked");
            return Err(OrderError::SymbolInvalid(request.instrument.symbol.clone()));
        }

        let value = request.notional();
        let mut balance = self.balance.lock().await;
        match request.side {
            OrderSide::Buy => {
                if *balance < value {
                    debug!(
                        required = %value,
                        available = %balance.clone(),
                        "[PAPER] Insufficient funds"
                    );
                    return Err(OrderError::InsufficientFunds);
                }
                *balance -= value;
            }
            OrderSide::Sell => *balance += value,
        }

        info!(
            order_id = %request.id,
            instrument = %request.instrument,
            side = %request.side,
            price = %request.reference_price,
            quantity = %request.quantity,
            balance = %balance.clone(),
            "[PAPER] Simulated fill"
        );

        Ok(Fill::for_request(request, request.reference_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use trading_core::types::{InstrumentKey, OptionType};

    fn instrument(symbol: &str) -> InstrumentKey {
        InstrumentKey::new(
            symbol,
            NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            Decimal::new(24500, 0),
            OptionType::Put,
        )
    }

    #[tokio::test]
    async fn test_paper_wallet_debits_and_credits() {
        let gateway = PaperGateway::new(Decimal::new(10_000, 0));

        let buy = OrderRequest::buy(instrument("NIFTY"), Decimal::new(50, 0), Decimal::new(100, 0));
        let fill = gateway.place_order(&buy).await.unwrap();
        assert_eq!(fill.price, Decimal::new(100, 0));
        assert_eq!(gateway.balance().await, Decimal::new(5_000, 0));

        let sell = OrderRequest::sell(instrument("NIFTY"), Decimal::new(50, 0), Decimal::new(110, 0));
        gateway.place_order(&sell).await.unwrap();
        assert_eq!(gateway.balance().await, Decimal::new(10_500, 0));
        assert_eq!(gateway.orders_placed(), 2);
    }

    #[tokio::test]
    async fn test_paper_rejects_unaffordable_buy() {
        let gateway = PaperGateway::new(Decimal::new(1_000, 0));
        let buy = OrderRequest::buy(instrument("NIFTY"), Decimal::new(75, 0), Decimal::new(100, 0));

        let result = gateway.place_order(&buy).await;
        assert_eq!(result.unwrap_err(), OrderError::InsufficientFunds);
        assert_eq!(gateway.balance().await, Decimal::new(1_000, 0));
    }

    #[tokio::test]
    async fn test_paper_blocked_symbol() {
        let gateway = PaperGateway::new(Decimal::new(100_000, 0));
        gateway.block_symbol("BANKNIFTY");

        let buy = OrderRequest::buy(instrument("BANKNIFTY"), Decimal::ONE, Decimal::new(100, 0));
        assert_eq!(
            gateway.place_order(&buy).await.unwrap_err(),
            OrderError::SymbolInvalid("BANKNIFTY".to_string())
        );

        gateway.unblock_symbol("BANKNIFTY");
        assert!(gateway.place_order(&buy).await.is_ok());
    }
}
