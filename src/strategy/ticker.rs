//! Interval-driven background work per exchange

use super::Strategy;
use crate::engine::Engine;
use crate::exchange::ExchangeConnector;
use crate::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// The work one poller tick performs
pub type TickFn = Arc<dyn Fn(Arc<dyn ExchangeConnector>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs a callback for each exchange on a fixed interval.
///
/// `init` spawns the poller for an exchange and fires the first tick
/// immediately; `deinit` stops it. At most one poller per exchange may
/// exist at a time: initializing the same exchange twice is a programming
/// error and panics rather than silently stacking pollers.
pub struct TickerStrategy {
    interval: Duration,
    tick: TickFn,
    pollers: DashMap<String, JoinHandle<()>>,
}

impl TickerStrategy {
    /// Create a poller strategy with the given cadence
    pub fn new(interval: Duration, tick: TickFn) -> Self {
        assert!(
            !interval.is_zero(),
            "ticker strategy interval must be non-zero"
        );
        Self {
            interval,
            tick,
            pollers: DashMap::new(),
        }
    }

    /// Start the poller for one exchange.
    ///
    /// Panics if a poller for this exchange is already running.
    pub fn start(&self, exchange: &Arc<dyn ExchangeConnector>) {
        let name = exchange.name().to_lowercase();
        match self.pollers.entry(name.clone()) {
            Entry::Occupied(_) => {
                panic!("exchange {name} already has a running poller");
            }
            Entry::Vacant(slot) => {
                let tick = Arc::clone(&self.tick);
                let interval = self.interval;
                let exchange = Arc::clone(exchange);
                slot.insert(tokio::spawn(async move {
                    let mut timer = tokio::time::interval(interval);
                    loop {
                        // The first tick completes immediately, so the
                        // callback runs once right after init.
                        timer.tick().await;
                        tick(Arc::clone(&exchange)).await;
                    }
                }));
                debug!(exchange = %name, interval = ?interval, "poller started");
            }
        }
    }

    /// Stop the poller for one exchange.
    ///
    /// Panics if no poller is running for this exchange.
    pub fn stop(&self, exchange: &Arc<dyn ExchangeConnector>) {
        let name = exchange.name().to_lowercase();
        let Some((_, handle)) = self.pollers.remove(&name) else {
            panic!("exchange {name} has no running poller");
        };
        handle.abort();
        debug!(exchange = %name, "poller stopped");
    }
}

#[async_trait]
impl Strategy for TickerStrategy {
    async fn init(&self, _engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
        self.start(exchange);
        Ok(())
    }

    async fn deinit(&self, _engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
        self.stop(exchange);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperExchange, Pair};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange() -> Arc<dyn ExchangeConnector> {
        Arc::new(PaperExchange::new(
            "paper",
            vec![(Pair::new("BTC", "USDT"), 50_000.0)],
        ))
    }

    fn counting(counter: Arc<AtomicUsize>) -> TickFn {
        Arc::new(move |_exchange| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_poller_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let strategy = TickerStrategy::new(Duration::from_millis(10), counting(Arc::clone(&ticks)));
        let exchange = exchange();

        strategy.start(&exchange);
        tokio::time::sleep(Duration::from_millis(55)).await;
        strategy.stop(&exchange);

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least two ticks, saw {seen}");
    }

    #[tokio::test]
    #[should_panic(expected = "already has a running poller")]
    async fn test_double_start_panics() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let strategy = TickerStrategy::new(Duration::from_secs(60), counting(ticks));
        let exchange = exchange();
        strategy.start(&exchange);
        strategy.start(&exchange);
    }

    #[tokio::test]
    #[should_panic(expected = "has no running poller")]
    async fn test_stop_without_start_panics() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let strategy = TickerStrategy::new(Duration::from_secs(60), counting(ticks));
        strategy.stop(&exchange());
    }
}
