//! In-process simulated exchange
//!
//! Implements the full connector surface against in-memory state with a
//! random-walk price stream, so the engine can be driven end to end without
//! any wire protocol. Used by the demo binary and the integration tests.

use super::{
    AssetClass, CurrencyBalance, EventStream, ExchangeConnector, ExchangeHoldings, OrderDetail,
    OrderModify, OrderSide, OrderStatus, OrderSubmission, Pair, StreamEvent, SubAccount,
    SubmitResponse, Ticker,
};
use crate::{Currency, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

const STREAM_BUFFER: usize = 256;

// A live venue acks the submission before the fill shows up on the stream;
// the simulated fill keeps that ordering so callers have registered the
// order by the time its detail event arrives.
const FILL_DELAY: Duration = Duration::from_millis(20);

/// A simulated exchange backed entirely by in-memory state
pub struct PaperExchange {
    name: String,
    websocket_enabled: bool,
    pairs: Vec<Pair>,
    prices: Arc<DashMap<Pair, f64>>,
    open_orders: DashMap<String, OrderDetail>,
    holdings: Mutex<ExchangeHoldings>,
    sender: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    closed: Arc<AtomicBool>,
    tick_interval: Duration,
}

impl PaperExchange {
    /// Create a paper exchange quoting the given pairs at their seed prices
    pub fn new(name: &str, seeds: Vec<(Pair, f64)>) -> Self {
        let prices = DashMap::new();
        let mut pairs = Vec::with_capacity(seeds.len());
        for (pair, price) in seeds {
            pairs.push(pair.clone());
            prices.insert(pair, price);
        }
        Self {
            name: name.to_lowercase(),
            websocket_enabled: true,
            pairs,
            prices: Arc::new(prices),
            open_orders: DashMap::new(),
            holdings: Mutex::new(ExchangeHoldings::new()),
            sender: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            tick_interval: Duration::from_millis(50),
        }
    }

    /// Override the price-stream tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Disable the websocket, for exercising the not-enabled error path
    pub fn with_websocket_disabled(mut self) -> Self {
        self.websocket_enabled = false;
        self
    }

    /// Seed a balance into the simulated holdings
    pub async fn credit(&self, account: &str, asset: AssetClass, code: Currency, total: f64) {
        let mut holdings = self.holdings.lock().await;
        let sub = holdings
            .accounts
            .entry(account.to_string())
            .or_insert_with(|| SubAccount {
                id: account.to_string(),
                ..Default::default()
            });
        sub.balances.entry(asset).or_default().insert(
            code.clone(),
            CurrencyBalance {
                currency: code,
                total,
                hold: 0.0,
            },
        );
    }

    /// Overwrite the quoted price for a pair
    pub fn set_price(&self, pair: &Pair, price: f64) {
        self.prices.insert(pair.clone(), price);
    }

    /// Push an arbitrary event into the active stream, for tests
    pub async fn inject(&self, event: StreamEvent) -> Result<()> {
        let guard = self.sender.lock().await;
        let sender = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no active stream on {}", self.name))?;
        sender.send(event).await?;
        Ok(())
    }

    /// Terminate the active stream, simulating an unexpected disconnect
    pub async fn close_stream(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sender.lock().await.take();
    }

    fn quote(&self, pair: &Pair) -> Result<Ticker> {
        let last = *self
            .prices
            .get(pair)
            .ok_or_else(|| anyhow::anyhow!("{} does not trade {}", self.name, pair))?;
        Ok(Ticker {
            pair: pair.clone(),
            last,
            bid: last * 0.999,
            ask: last * 1.001,
            last_updated: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_websocket(&self) -> bool {
        true
    }

    fn is_websocket_enabled(&self) -> bool {
        self.websocket_enabled
    }

    async fn available_pairs(&self, _asset: AssetClass) -> Result<Vec<Pair>> {
        Ok(self.pairs.clone())
    }

    async fn fetch_ticker(&self, pair: &Pair, _asset: AssetClass) -> Result<Ticker> {
        self.quote(pair)
    }

    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmitResponse> {
        let order_id = submission
            .client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let detail = OrderDetail {
            order_id: order_id.clone(),
            pair: submission.pair.clone(),
            side: submission.side,
            status: OrderStatus::Filled,
            price: submission.price,
            amount: submission.amount,
            executed: submission.amount,
            date: now,
        };
        self.open_orders.insert(order_id.clone(), detail.clone());
        debug!(exchange = %self.name, order_id = %order_id, "paper order filled");

        if let Some(sender) = self.sender.lock().await.clone() {
            tokio::spawn(async move {
                tokio::time::sleep(FILL_DELAY).await;
                let _ = sender.send(StreamEvent::Order(detail)).await;
            });
        }

        Ok(SubmitResponse {
            order_id,
            placed: true,
            pair: submission.pair.clone(),
            side: submission.side,
            amount: submission.amount,
            price: submission.price,
            timestamp: now,
        })
    }

    async fn modify_order(&self, modify: &OrderModify) -> Result<SubmitResponse> {
        let mut entry = self
            .open_orders
            .get_mut(&modify.order_id)
            .ok_or_else(|| anyhow::anyhow!("unknown order {}", modify.order_id))?;
        entry.price = modify.price;
        entry.amount = modify.amount;
        Ok(SubmitResponse {
            order_id: modify.order_id.clone(),
            placed: true,
            pair: modify.pair.clone(),
            side: modify.side,
            amount: modify.amount,
            price: modify.price,
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, _pair: &Pair, order_id: &str) -> Result<()> {
        self.open_orders
            .remove(order_id)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("unknown order {}", order_id))
    }

    async fn account_holdings(&self) -> Result<ExchangeHoldings> {
        Ok(self.holdings.lock().await.clone())
    }

    async fn websocket(&self) -> Result<Box<dyn EventStream>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        *self.sender.lock().await = Some(tx.clone());
        self.closed.store(false, Ordering::SeqCst);

        let pairs = self.pairs.clone();
        let prices = Arc::clone(&self.prices);
        let closed = Arc::clone(&self.closed);
        let interval = self.tick_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                for pair in &pairs {
                    let last = {
                        let mut price = match prices.get_mut(pair) {
                            Some(price) => price,
                            None => continue,
                        };
                        *price *= 1.0 + (rand::random::<f64>() - 0.5) * 0.002;
                        *price
                    };
                    let tick = Ticker {
                        pair: pair.clone(),
                        last,
                        bid: last * 0.999,
                        ask: last * 1.001,
                        last_updated: Utc::now(),
                    };
                    if tx.send(StreamEvent::Price(tick)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::new(PaperStream {
            connecting: false,
            connected: false,
            receiver: rx,
        }))
    }
}

struct PaperStream {
    connecting: bool,
    connected: bool,
    receiver: mpsc::Receiver<StreamEvent>,
}

#[async_trait]
impl EventStream for PaperStream {
    fn is_connecting(&self) -> bool {
        self.connecting
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn flush_channels(&mut self) -> Result<()> {
        Ok(())
    }

    fn receiver(&mut self) -> &mut mpsc::Receiver<StreamEvent> {
        &mut self.receiver
    }
}
