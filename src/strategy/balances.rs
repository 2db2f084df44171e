//! Balance polling and holdings lookups

use super::{Strategy, TickerStrategy};
use crate::engine::Engine;
use crate::exchange::{
    BalanceChange, CurrencyBalance, ExchangeConnector, ExchangeHoldings, SubAccount,
};
use crate::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Polls account holdings on a fixed cadence and answers balance lookups.
///
/// One poller runs per initialized exchange (enforced by the inner
/// [`TickerStrategy`]); balance-change events arriving between polls are
/// applied to the stored holdings directly.
pub struct BalancesStrategy {
    balances: Arc<DashMap<String, ExchangeHoldings>>,
    ticker: TickerStrategy,
}

impl BalancesStrategy {
    /// Create a balances strategy refreshing at the given interval
    pub fn new(refresh: Duration) -> Self {
        let balances: Arc<DashMap<String, ExchangeHoldings>> = Arc::new(DashMap::new());
        let stored = Arc::clone(&balances);
        let ticker = TickerStrategy::new(
            refresh,
            Arc::new(move |exchange: Arc<dyn ExchangeConnector>| {
                let stored = Arc::clone(&stored);
                Box::pin(async move {
                    match exchange.account_holdings().await {
                        Ok(holdings) => {
                            stored.insert(exchange.name().to_lowercase(), holdings);
                        }
                        Err(err) => {
                            warn!(
                                exchange = exchange.name(),
                                error = %err,
                                "holdings refresh failed"
                            );
                        }
                    }
                })
            }),
        );
        Self { balances, ticker }
    }

    /// The last polled holdings for one exchange
    pub fn holdings(&self, exchange_name: &str) -> Result<ExchangeHoldings> {
        self.balances
            .get(&exchange_name.to_lowercase())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::HoldingsNotFound(exchange_name.to_string()).into())
    }

    /// Balance of one currency in one account on one exchange
    pub fn currency_balance(
        &self,
        exchange_name: &str,
        account_id: &str,
        code: &crate::Currency,
        asset: crate::AssetClass,
    ) -> Result<CurrencyBalance> {
        let holdings = self.holdings(exchange_name)?;
        holdings.currency_balance(exchange_name, account_id, code, asset)
    }
}

#[async_trait]
impl Strategy for BalancesStrategy {
    async fn init(&self, _engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
        self.ticker.start(exchange);
        Ok(())
    }

    async fn on_balance_change(
        &self,
        _engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        change: &BalanceChange,
    ) -> Result<()> {
        let mut holdings = self
            .balances
            .entry(exchange.name().to_lowercase())
            .or_default();
        let account = holdings
            .accounts
            .entry(change.account.clone())
            .or_insert_with(|| SubAccount {
                id: change.account.clone(),
                ..Default::default()
            });
        account.balances.entry(change.asset_class).or_default().insert(
            change.currency.clone(),
            CurrencyBalance {
                currency: change.currency.clone(),
                total: change.amount,
                hold: 0.0,
            },
        );
        Ok(())
    }

    async fn deinit(&self, _engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
        self.ticker.stop(exchange);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{AssetClass, PaperExchange, Pair};
    use crate::Currency;

    fn paper() -> Arc<PaperExchange> {
        Arc::new(PaperExchange::new(
            "paper",
            vec![(Pair::new("BTC", "USDT"), 50_000.0)],
        ))
    }

    #[tokio::test]
    async fn test_holdings_absent_before_poll() {
        let strategy = BalancesStrategy::new(Duration::from_secs(60));
        assert!(strategy.holdings("paper").is_err());
    }

    #[tokio::test]
    async fn test_poll_populates_holdings() {
        let exchange = paper();
        exchange
            .credit("main", AssetClass::Spot, Currency::new("BTC"), 2.0)
            .await;

        let engine = Engine::builder().build().unwrap();
        let strategy = BalancesStrategy::new(Duration::from_millis(10));
        let dyn_exchange: Arc<dyn ExchangeConnector> = Arc::clone(&exchange) as _;
        strategy.init(&engine, &dyn_exchange).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let balance = strategy
            .currency_balance("paper", "main", &Currency::new("BTC"), AssetClass::Spot)
            .unwrap();
        assert_eq!(balance.total, 2.0);

        strategy.deinit(&engine, &dyn_exchange).await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_change_updates_holdings() {
        let exchange = paper();
        let engine = Engine::builder().build().unwrap();
        let strategy = BalancesStrategy::new(Duration::from_secs(60));
        let dyn_exchange: Arc<dyn ExchangeConnector> = Arc::clone(&exchange) as _;

        strategy
            .on_balance_change(
                &engine,
                &dyn_exchange,
                &BalanceChange {
                    account: "main".to_string(),
                    asset_class: AssetClass::Spot,
                    currency: Currency::new("ETH"),
                    amount: 10.0,
                },
            )
            .await
            .unwrap();

        let balance = strategy
            .currency_balance("paper", "main", &Currency::new("ETH"), AssetClass::Spot)
            .unwrap();
        assert_eq!(balance.total, 10.0);
    }
}
