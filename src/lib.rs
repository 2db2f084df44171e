//! Strategy Engine
//!
//! A concurrent runtime that attaches pluggable trading strategies to one or
//! more exchange connections, routes decoded market and order events to those
//! strategies with per-exchange ordering guarantees, tracks submitted orders
//! exactly once, and answers currency-routing and arbitrage queries over the
//! graph of tradable pairs.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod exchange;
pub mod history;
pub mod routing;
pub mod strategy;
pub mod utils;

// Re-export commonly used types
pub use engine::{Engine, EngineBuilder, OnFilled, OrderRegistry, OrderValue};
pub use exchange::{AssetClass, Currency, ExchangeConnector, Pair, StreamEvent};
pub use history::{Historian, RollingWindow};
pub use strategy::{Strategy, StrategyRegistry};

use std::fmt;

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;

/// Typed error conditions surfaced by the engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// No strategy is registered under the given name
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    /// No exchange is registered under the given name
    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    /// An order with the same (exchange, order id) key is already registered
    #[error("order already exists: {exchange}/{order_id}")]
    OrderAlreadyExists {
        /// Exchange the order was submitted to
        exchange: String,
        /// Exchange-assigned order identifier
        order_id: String,
    },

    /// The source currency has no tradable pairs at all
    #[error("no pairs found for {0}")]
    NoPairsFound(String),

    /// The destination currency is unreachable in the constructed graph
    #[error("no conversion path from {from} to {to}")]
    NoPathFound {
        /// Source currency code
        from: String,
        /// Destination currency code
        to: String,
    },

    /// The exchange event stream closed; streams are expected to run forever,
    /// so this is fatal for the affected exchange
    #[error("event stream for {0} ended unexpectedly")]
    StreamEnded(String),

    /// A classification error event arrived without an underlying cause,
    /// which violates the decode contract
    #[error("classification error without underlying cause on {0}")]
    ClassificationWithoutCause(String),

    /// The exchange does not support websocket streaming
    #[error("websocket not supported by {0}")]
    WebsocketNotSupported(String),

    /// The exchange supports websocket streaming but it is disabled
    #[error("websocket not enabled for {0}")]
    WebsocketNotEnabled(String),

    /// No holdings have been stored yet for the given exchange
    #[error("holdings not found for {0}")]
    HoldingsNotFound(String),

    /// A holdings query was made on an engine built without balance polling
    #[error("engine built without balances support")]
    BalancesNotConfigured,

    /// The requested currency is absent from the stored holdings
    #[error("currency {code} not found on {exchange}")]
    CurrencyNotFound {
        /// Exchange whose holdings were searched
        exchange: String,
        /// Missing currency code
        code: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Collected failures from a registry-wide strategy init or deinit pass.
///
/// One broken strategy must not keep the others from initializing, so the
/// whole pass runs to completion and every individual failure lands here.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<anyhow::Error>,
}

impl AggregateError {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure
    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether the pass completed without failures
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Recorded failures
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// Convert into `Ok(())` when empty, `Err(self)` otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s):", self.errors.len())?;
        for err in &self.errors {
            write!(f, " [{}]", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert!(!APP_NAME.is_empty());
    }

    #[test]
    fn test_aggregate_error_display() {
        let mut agg = AggregateError::new();
        assert!(agg.is_empty());
        agg.push(anyhow::anyhow!("first"));
        agg.push(anyhow::anyhow!("second"));
        assert_eq!(agg.len(), 2);
        let rendered = agg.to_string();
        assert!(rendered.contains("first"));
        assert!(rendered.contains("second"));
        assert!(agg.into_result().is_err());
    }
}
