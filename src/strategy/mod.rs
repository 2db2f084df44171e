//! Pluggable strategies and the registry that fans events out to them

pub mod balances;
pub mod history;
pub mod ticker;

pub use balances::BalancesStrategy;
pub use history::HistoryStrategy;
pub use ticker::TickerStrategy;

use crate::engine::Engine;
use crate::exchange::{
    BalanceChange, ExchangeConnector, FundingData, KlineData, OrderBookSnapshot, OrderDetail,
    OrderModify, Ticker, TradeData,
};
use crate::{AggregateError, EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

/// A pluggable handler set responding to market and order lifecycle events
/// for one exchange.
///
/// All event callbacks default to no-ops so an implementation only spells
/// out the events it cares about. Callbacks for one exchange are always
/// invoked from that exchange's single router task; a strategy spanning
/// several exchanges sees concurrent calls (one per exchange) and must
/// guard any state shared across them.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Set the strategy up for one exchange
    async fn init(&self, engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()>;

    /// Funding-rate update
    async fn on_funding(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _data: &FundingData,
    ) -> Result<()> {
        Ok(())
    }

    /// Last-trade ticker
    async fn on_price(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _ticker: &Ticker,
    ) -> Result<()> {
        Ok(())
    }

    /// Candlestick update
    async fn on_kline(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _kline: &KlineData,
    ) -> Result<()> {
        Ok(())
    }

    /// Order-book snapshot
    async fn on_order_book(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _book: &OrderBookSnapshot,
    ) -> Result<()> {
        Ok(())
    }

    /// Order state change
    async fn on_order(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _detail: &OrderDetail,
    ) -> Result<()> {
        Ok(())
    }

    /// Order modification notice
    async fn on_modify(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _modify: &OrderModify,
    ) -> Result<()> {
        Ok(())
    }

    /// Account balance delta
    async fn on_balance_change(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _change: &BalanceChange,
    ) -> Result<()> {
        Ok(())
    }

    /// Public trade prints
    async fn on_trades(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _trades: &[TradeData],
    ) -> Result<()> {
        Ok(())
    }

    /// Payload that did not classify as any known event
    async fn on_unrecognized(
        &self,
        _engine: &Engine,
        _exchange: &Arc<dyn ExchangeConnector>,
        _payload: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }

    /// Tear the strategy down for one exchange
    async fn deinit(&self, engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()>;
}

/// Fans every call out to the named strategies it holds.
///
/// The registry stores trait objects, so "stored value is not a strategy"
/// cannot happen. Registration and removal are safe under concurrent
/// dispatch from multiple exchange tasks. Fan-out order is whatever the
/// backing map yields; nothing may rely on registration order.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: DashMap<String, Arc<dyn Strategy>>,
}

macro_rules! dispatch {
    ($registry:expr, $method:ident, $engine:expr, $exchange:expr, $payload:expr) => {
        for (name, strategy) in $registry.snapshot() {
            if let Err(err) = strategy.$method($engine, $exchange, $payload).await {
                warn!(
                    strategy = %name,
                    exchange = $exchange.name(),
                    method = stringify!($method),
                    error = %err,
                    "strategy handler failed"
                );
            }
        }
    };
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under a unique name, replacing any previous one
    pub fn add(&self, name: &str, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(name.to_string(), strategy);
    }

    /// Remove and return the strategy registered under `name`
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .remove(name)
            .map(|(_, strategy)| strategy)
            .ok_or_else(|| EngineError::StrategyNotFound(name.to_string()).into())
    }

    /// Look up the strategy registered under `name`
    pub fn get(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::StrategyNotFound(name.to_string()).into())
    }

    /// Number of registered strategies
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the registry holds no strategies
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    // Dispatch iterates a snapshot so handlers never run under a map shard
    // lock and concurrent add/remove cannot block an exchange task.
    fn snapshot(&self) -> Vec<(String, Arc<dyn Strategy>)> {
        self.strategies
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Initialize every registered strategy for one exchange.
    ///
    /// Does not short-circuit: every strategy gets its `init` call and all
    /// failures come back in one aggregated error.
    pub async fn init_all(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
    ) -> Result<()> {
        let mut failures = AggregateError::new();
        for (name, strategy) in self.snapshot() {
            if let Err(err) = strategy.init(engine, exchange).await {
                failures.push(err.context(format!("init of strategy {name}")));
            }
        }
        failures.into_result()
    }

    /// Tear every registered strategy down for one exchange, aggregating
    /// failures the same way `init_all` does.
    pub async fn deinit_all(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
    ) -> Result<()> {
        let mut failures = AggregateError::new();
        for (name, strategy) in self.snapshot() {
            if let Err(err) = strategy.deinit(engine, exchange).await {
                failures.push(err.context(format!("deinit of strategy {name}")));
            }
        }
        failures.into_result()
    }

    /// Dispatch a funding update to every strategy
    pub async fn on_funding(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        data: &FundingData,
    ) {
        dispatch!(self, on_funding, engine, exchange, data);
    }

    /// Dispatch a ticker to every strategy
    pub async fn on_price(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        ticker: &Ticker,
    ) {
        dispatch!(self, on_price, engine, exchange, ticker);
    }

    /// Dispatch a kline to every strategy
    pub async fn on_kline(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        kline: &KlineData,
    ) {
        dispatch!(self, on_kline, engine, exchange, kline);
    }

    /// Dispatch an order-book snapshot to every strategy
    pub async fn on_order_book(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        book: &OrderBookSnapshot,
    ) {
        dispatch!(self, on_order_book, engine, exchange, book);
    }

    /// Dispatch an order state change to every strategy
    pub async fn on_order(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        detail: &OrderDetail,
    ) {
        dispatch!(self, on_order, engine, exchange, detail);
    }

    /// Dispatch an order modification to every strategy
    pub async fn on_modify(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        modify: &OrderModify,
    ) {
        dispatch!(self, on_modify, engine, exchange, modify);
    }

    /// Dispatch a balance change to every strategy
    pub async fn on_balance_change(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        change: &BalanceChange,
    ) {
        dispatch!(self, on_balance_change, engine, exchange, change);
    }

    /// Dispatch trade prints to every strategy
    pub async fn on_trades(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        trades: &[TradeData],
    ) {
        dispatch!(self, on_trades, engine, exchange, trades);
    }

    /// Dispatch an unrecognized payload to every strategy
    pub async fn on_unrecognized(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        payload: &serde_json::Value,
    ) {
        dispatch!(self, on_unrecognized, engine, exchange, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperExchange, Pair};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStrategy {
        prices_seen: AtomicUsize,
        fail: bool,
    }

    impl CountingStrategy {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                prices_seen: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Strategy for CountingStrategy {
        async fn init(
            &self,
            _engine: &Engine,
            _exchange: &Arc<dyn ExchangeConnector>,
        ) -> Result<()> {
            if self.fail {
                anyhow::bail!("refusing to init");
            }
            Ok(())
        }

        async fn on_price(
            &self,
            _engine: &Engine,
            _exchange: &Arc<dyn ExchangeConnector>,
            _ticker: &Ticker,
        ) -> Result<()> {
            self.prices_seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler failure");
            }
            Ok(())
        }

        async fn deinit(
            &self,
            _engine: &Engine,
            _exchange: &Arc<dyn ExchangeConnector>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn fixture() -> (Engine, Arc<dyn ExchangeConnector>) {
        let exchange: Arc<dyn ExchangeConnector> = Arc::new(PaperExchange::new(
            "paper",
            vec![(Pair::new("BTC", "USDT"), 50_000.0)],
        ));
        let engine = Engine::builder().build().unwrap();
        (engine, exchange)
    }

    fn tick() -> Ticker {
        Ticker {
            pair: Pair::new("BTC", "USDT"),
            last: 50_000.0,
            bid: 49_990.0,
            ask: 50_010.0,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_add_get_remove() {
        let registry = StrategyRegistry::new();
        registry.add("counting", CountingStrategy::new(false));
        assert!(registry.get("counting").is_ok());
        assert!(registry.get("absent").is_err());
        assert!(registry.remove("counting").is_ok());
        assert!(registry.remove("counting").is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let (engine, exchange) = fixture();
        let registry = StrategyRegistry::new();
        let broken = CountingStrategy::new(true);
        let healthy = CountingStrategy::new(false);
        registry.add("broken", Arc::clone(&broken) as Arc<dyn Strategy>);
        registry.add("healthy", Arc::clone(&healthy) as Arc<dyn Strategy>);

        registry.on_price(&engine, &exchange, &tick()).await;
        registry.on_price(&engine, &exchange, &tick()).await;

        assert_eq!(broken.prices_seen.load(Ordering::SeqCst), 2);
        assert_eq!(healthy.prices_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_init_all_aggregates_failures() {
        let (engine, exchange) = fixture();
        let registry = StrategyRegistry::new();
        registry.add("broken-a", CountingStrategy::new(true));
        registry.add("broken-b", CountingStrategy::new(true));
        registry.add("healthy", CountingStrategy::new(false));

        let err = registry.init_all(&engine, &exchange).await.unwrap_err();
        let aggregate = err.downcast_ref::<AggregateError>().unwrap();
        assert_eq!(aggregate.len(), 2);
    }
}
