//! Connector capability trait and the event-stream handle

use super::{
    AssetClass, ExchangeHoldings, OrderModify, OrderSubmission, Pair, StreamEvent, SubmitResponse,
    Ticker,
};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Handle to an exchange's decoded event stream.
///
/// The router takes ownership of one handle per exchange, connects it, and
/// then blocks on [`EventStream::receiver`]. The channel closing is a fatal
/// condition for that exchange; a healthy stream never ends.
#[async_trait]
pub trait EventStream: Send {
    /// Whether a connection attempt is in flight
    fn is_connecting(&self) -> bool;

    /// Whether the stream is connected
    fn is_connected(&self) -> bool;

    /// Establish the connection
    async fn connect(&mut self) -> Result<()>;

    /// Resubscribe all channels after a connect
    async fn flush_channels(&mut self) -> Result<()>;

    /// The decoded-event receive channel
    fn receiver(&mut self) -> &mut mpsc::Receiver<StreamEvent>;
}

/// Capability interface to one exchange.
///
/// Everything the engine consumes from the connectivity layer goes through
/// this trait; implementations own authentication, rate limiting and payload
/// decoding.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Canonical lowercase exchange name
    fn name(&self) -> &str;

    /// Whether the exchange offers websocket streaming at all
    fn supports_websocket(&self) -> bool;

    /// Whether websocket streaming is enabled in this configuration
    fn is_websocket_enabled(&self) -> bool;

    /// All tradable pairs for an asset class
    async fn available_pairs(&self, asset: AssetClass) -> Result<Vec<Pair>>;

    /// Current ticker for a pair
    async fn fetch_ticker(&self, pair: &Pair, asset: AssetClass) -> Result<Ticker>;

    /// Submit an order
    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmitResponse>;

    /// Modify an open order in place
    async fn modify_order(&self, modify: &OrderModify) -> Result<SubmitResponse>;

    /// Cancel an open order
    async fn cancel_order(&self, pair: &Pair, order_id: &str) -> Result<()>;

    /// Current account holdings
    async fn account_holdings(&self) -> Result<ExchangeHoldings>;

    /// Open a fresh event-stream handle
    async fn websocket(&self) -> Result<Box<dyn EventStream>>;
}
