//! Rolling-history aggregation over price and order events

use super::Strategy;
use crate::engine::Engine;
use crate::exchange::{ExchangeConnector, OrderDetail, Ticker};
use crate::history::{Historian, RollingWindow};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Gathers per-exchange rolling histories instead of querying exchanges for
/// historical data.
///
/// Price historians sample the last-trade price; order historians sample the
/// full order detail. Historians for one exchange are only ever touched by
/// that exchange's router task, so the per-exchange lists need no lock of
/// their own; the outer map is concurrent because historians can be
/// registered while other exchanges dispatch.
#[derive(Default)]
pub struct HistoryStrategy {
    price_units: DashMap<String, Vec<Historian<f64>>>,
    order_units: DashMap<String, Vec<Historian<OrderDetail>>>,
}

impl HistoryStrategy {
    /// Create a history strategy with no historians registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a historian over last-trade prices for one exchange
    pub fn add_price_historian(
        &self,
        exchange_name: &str,
        interval: Duration,
        capacity: usize,
        callback: impl Fn(&RollingWindow<f64>) + Send + Sync + 'static,
    ) {
        self.price_units
            .entry(exchange_name.to_lowercase())
            .or_default()
            .push(Historian::new(interval, capacity, callback));
    }

    /// Register a historian over order details for one exchange
    pub fn add_order_historian(
        &self,
        exchange_name: &str,
        interval: Duration,
        capacity: usize,
        callback: impl Fn(&RollingWindow<OrderDetail>) + Send + Sync + 'static,
    ) {
        self.order_units
            .entry(exchange_name.to_lowercase())
            .or_default()
            .push(Historian::new(interval, capacity, callback));
    }

    /// Number of price historians registered for an exchange
    pub fn price_historian_count(&self, exchange_name: &str) -> usize {
        self.price_units
            .get(&exchange_name.to_lowercase())
            .map(|units| units.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Strategy for HistoryStrategy {
    async fn init(&self, _engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
        let key = exchange.name().to_lowercase();
        self.price_units.entry(key.clone()).or_default();
        self.order_units.entry(key).or_default();
        Ok(())
    }

    async fn on_price(
        &self,
        _engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        ticker: &Ticker,
    ) -> Result<()> {
        // Safe without further locking: all price events for one exchange
        // arrive on that exchange's single router task.
        if let Some(mut units) = self.price_units.get_mut(&exchange.name().to_lowercase()) {
            for historian in units.iter_mut() {
                historian.update(ticker.last_updated, ticker.last);
            }
        }
        Ok(())
    }

    async fn on_order(
        &self,
        _engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        detail: &OrderDetail,
    ) -> Result<()> {
        if let Some(mut units) = self.order_units.get_mut(&exchange.name().to_lowercase()) {
            for historian in units.iter_mut() {
                historian.update(detail.date, detail.clone());
            }
        }
        Ok(())
    }

    async fn deinit(&self, _engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
        let key = exchange.name().to_lowercase();
        self.price_units.remove(&key);
        self.order_units.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, OrderStatus, PaperExchange, Pair};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture() -> (Engine, Arc<dyn ExchangeConnector>) {
        let exchange: Arc<dyn ExchangeConnector> = Arc::new(PaperExchange::new(
            "paper",
            vec![(Pair::new("BTC", "USDT"), 50_000.0)],
        ));
        (Engine::builder().build().unwrap(), exchange)
    }

    fn tick_at(nanos: i64, last: f64) -> Ticker {
        Ticker {
            pair: Pair::new("BTC", "USDT"),
            last,
            bid: last - 1.0,
            ask: last + 1.0,
            last_updated: Utc.timestamp_nanos(nanos),
        }
    }

    #[tokio::test]
    async fn test_price_history_gated_by_interval() {
        let (engine, exchange) = fixture();
        let strategy = HistoryStrategy::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        strategy.add_price_historian("paper", Duration::from_secs(1), 16, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        strategy.init(&engine, &exchange).await.unwrap();

        let second = 1_000_000_000;
        strategy
            .on_price(&engine, &exchange, &tick_at(second, 100.0))
            .await
            .unwrap();
        strategy
            .on_price(&engine, &exchange, &tick_at(second + 10, 101.0))
            .await
            .unwrap();
        strategy
            .on_price(&engine, &exchange, &tick_at(2 * second, 102.0))
            .await
            .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_order_history_receives_details() {
        let (engine, exchange) = fixture();
        let strategy = HistoryStrategy::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        strategy.add_order_historian("paper", Duration::ZERO, 8, move |window| {
            counter.store(window.len(), Ordering::SeqCst);
        });
        strategy.init(&engine, &exchange).await.unwrap();

        let detail = OrderDetail {
            order_id: "o-1".to_string(),
            pair: Pair::new("BTC", "USDT"),
            side: OrderSide::Buy,
            status: OrderStatus::Filled,
            price: 50_000.0,
            amount: 1.0,
            executed: 1.0,
            date: Utc::now(),
        };
        strategy.on_order(&engine, &exchange, &detail).await.unwrap();
        strategy.on_order(&engine, &exchange, &detail).await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deinit_drops_historians() {
        let (engine, exchange) = fixture();
        let strategy = HistoryStrategy::new();
        strategy.add_price_historian("paper", Duration::ZERO, 4, |_| {});
        assert_eq!(strategy.price_historian_count("paper"), 1);

        strategy.deinit(&engine, &exchange).await.unwrap();
        assert_eq!(strategy.price_historian_count("paper"), 0);
    }
}
