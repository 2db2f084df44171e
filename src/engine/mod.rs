//! The engine: strategy fan-out, order bookkeeping and per-exchange routing
//!
//! One [`Engine`] is constructed at process start and passed by reference to
//! everything that needs it; there is no ambient global instance. Each
//! connected exchange is driven by exactly one task spawned from
//! [`Engine::run`], which is the only serialization mechanism per-exchange
//! strategy state relies on.

pub mod order_registry;
pub mod router;

pub use order_registry::{OrderKey, OrderRegistry, OrderValue};

use crate::config::EngineConfig;
use crate::exchange::{
    ExchangeConnector, ExchangeHoldings, OrderDetail, OrderModify, OrderStatus, OrderSubmission,
    SubmitResponse,
};
use crate::strategy::{BalancesStrategy, StrategyRegistry};
use crate::{AggregateError, EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Caller context attached to a submitted order, invoked when it fills.
#[async_trait]
pub trait OnFilled: Send + Sync {
    /// Called with the fill detail for an order this context was attached to
    async fn on_filled(
        &self,
        engine: &Engine,
        exchange: &Arc<dyn ExchangeConnector>,
        detail: &OrderDetail,
    );
}

/// The strategy-dispatch and order-tracking engine
pub struct Engine {
    config: EngineConfig,
    root: StrategyRegistry,
    registry: OrderRegistry,
    exchanges: DashMap<String, Arc<dyn ExchangeConnector>>,
    balances: Option<Arc<BalancesStrategy>>,
}

impl Engine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The registered strategies
    pub fn strategies(&self) -> &StrategyRegistry {
        &self.root
    }

    /// The order registry
    pub fn orders(&self) -> &OrderRegistry {
        &self.registry
    }

    /// The configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Attach an exchange connection
    pub fn add_exchange(&self, exchange: Arc<dyn ExchangeConnector>) {
        self.exchanges
            .insert(exchange.name().to_lowercase(), exchange);
    }

    /// Look up a connected exchange by name
    pub fn exchange(&self, name: &str) -> Result<Arc<dyn ExchangeConnector>> {
        self.exchanges
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::ExchangeNotFound(name.to_string()).into())
    }

    /// All connected exchanges
    pub fn exchanges(&self) -> Vec<Arc<dyn ExchangeConnector>> {
        self.exchanges
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Submit an order without caller context
    pub async fn submit_order(
        &self,
        exchange_name: &str,
        submission: OrderSubmission,
    ) -> Result<SubmitResponse> {
        self.submit_order_with_observer(exchange_name, submission, None)
            .await
    }

    /// Submit an order and attach a fill observer to it.
    ///
    /// The submission is registered exactly once; if the exchange hands back
    /// an order id that is already registered, the duplicate is surfaced as
    /// [`EngineError::OrderAlreadyExists`] instead of overwriting the stored
    /// context.
    pub async fn submit_order_with_observer(
        &self,
        exchange_name: &str,
        submission: OrderSubmission,
        observer: Option<Arc<dyn OnFilled>>,
    ) -> Result<SubmitResponse> {
        let exchange = self.exchange(exchange_name)?;
        self.submit_on(&exchange, &submission, observer).await
    }

    async fn submit_on(
        &self,
        exchange: &Arc<dyn ExchangeConnector>,
        submission: &OrderSubmission,
        observer: Option<Arc<dyn OnFilled>>,
    ) -> Result<SubmitResponse> {
        let response = exchange.submit_order(submission).await?;
        info!(
            exchange = exchange.name(),
            order_id = %response.order_id,
            pair = %submission.pair,
            side = %submission.side,
            "order submitted"
        );
        if !self
            .registry
            .store(exchange.name(), response.clone(), observer)
        {
            return Err(EngineError::OrderAlreadyExists {
                exchange: exchange.name().to_string(),
                order_id: response.order_id,
            }
            .into());
        }
        Ok(response)
    }

    /// Stored context for a submitted order
    pub fn order_value(&self, exchange_name: &str, order_id: &str) -> Option<OrderValue> {
        self.registry.get(exchange_name, order_id)
    }

    /// Modify an open order, falling back to cancel-and-resubmit.
    ///
    /// When the exchange rejects the in-place modify, the order is cancelled
    /// and resubmitted with the new parameters; a fill observer registered
    /// for the original order carries over to the replacement.
    pub async fn modify_order(
        &self,
        exchange_name: &str,
        modify: OrderModify,
    ) -> Result<SubmitResponse> {
        let exchange = self.exchange(exchange_name)?;
        match exchange.modify_order(&modify).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(
                    exchange = exchange.name(),
                    order_id = %modify.order_id,
                    error = %err,
                    "modify rejected, cancelling and resubmitting"
                );
                if let Err(cancel_err) = exchange.cancel_order(&modify.pair, &modify.order_id).await
                {
                    warn!(
                        exchange = exchange.name(),
                        order_id = %modify.order_id,
                        error = %cancel_err,
                        "cancel during modify fallback failed"
                    );
                }
                let observer = self
                    .registry
                    .get(exchange.name(), &modify.order_id)
                    .and_then(|value| value.observer);
                let submission = OrderSubmission {
                    pair: modify.pair.clone(),
                    asset_class: modify.asset_class,
                    side: modify.side,
                    amount: modify.amount,
                    price: modify.price,
                    client_order_id: None,
                };
                self.submit_on(&exchange, &submission, observer).await
            }
        }
    }

    /// Holdings stored by the balances strategy for one exchange
    pub fn holdings(&self, exchange_name: &str) -> Result<ExchangeHoldings> {
        let balances = self
            .balances
            .as_ref()
            .ok_or(EngineError::BalancesNotConfigured)?;
        balances.holdings(exchange_name)
    }

    /// Registry bookkeeping for an inbound order-detail event.
    ///
    /// Runs before the event reaches the strategies: a filled order that was
    /// registered with a fill observer gets that observer invoked here.
    pub(crate) async fn handle_order_detail(
        &self,
        exchange: &Arc<dyn ExchangeConnector>,
        detail: &OrderDetail,
    ) {
        if detail.status != OrderStatus::Filled {
            return;
        }
        let Some(value) = self.registry.get(exchange.name(), &detail.order_id) else {
            return;
        };
        if let Some(observer) = value.observer {
            observer.on_filled(self, exchange, detail).await;
        }
    }

    /// Drive every connected exchange until its stream ends.
    ///
    /// Spawns one task per exchange: the task initializes all strategies for
    /// that exchange, runs the event router until the stream terminates, and
    /// tears the strategies down again. Router failures are fatal per
    /// exchange and are aggregated into the returned error; a healthy stream
    /// never ends, so under normal operation this future does not resolve.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks = tokio::task::JoinSet::new();
        for exchange in self.exchanges() {
            let engine = Arc::clone(&self);
            tasks.spawn(async move { drive(engine, exchange).await });
        }

        let mut failures = AggregateError::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(err),
                Err(join_err) => failures.push(join_err.into()),
            }
        }
        failures.into_result()
    }
}

/// One exchange task: init, route until fatal, deinit.
async fn drive(engine: Arc<Engine>, exchange: Arc<dyn ExchangeConnector>) -> Result<()> {
    let name = exchange.name().to_string();
    engine.strategies().init_all(&engine, &exchange).await?;
    info!(exchange = %name, "exchange task started");

    let result = router::run(&engine, &exchange).await;
    if let Err(err) = &result {
        error!(exchange = %name, error = %err, "exchange task failed");
    }

    if let Err(err) = engine.strategies().deinit_all(&engine, &exchange).await {
        warn!(exchange = %name, error = %err, "strategy teardown failed");
    }
    result
}

/// Fluent construction of an [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    balance_refresh: Option<Duration>,
    exchanges: Vec<Arc<dyn ExchangeConnector>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            balance_refresh: None,
            exchanges: Vec::new(),
        }
    }

    /// Use the given configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable balance polling at the given refresh interval
    pub fn balances(mut self, refresh: Duration) -> Self {
        self.balance_refresh = Some(refresh);
        self
    }

    /// Attach an exchange connection
    pub fn exchange(mut self, exchange: Arc<dyn ExchangeConnector>) -> Self {
        self.exchanges.push(exchange);
        self
    }

    /// Construct the engine
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let refresh = self
            .balance_refresh
            .or_else(|| self.config.balance_refresh());

        let mut engine = Engine {
            config: self.config,
            root: StrategyRegistry::new(),
            registry: OrderRegistry::new(),
            exchanges: DashMap::new(),
            balances: None,
        };

        if let Some(refresh) = refresh {
            let balances = Arc::new(BalancesStrategy::new(refresh));
            engine
                .root
                .add("balances", Arc::clone(&balances) as Arc<dyn crate::Strategy>);
            engine.balances = Some(balances);
        }

        for exchange in self.exchanges {
            engine.add_exchange(exchange);
        }
        Ok(engine)
    }
}
