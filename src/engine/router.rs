//! Per-exchange event routing
//!
//! Exactly one task per exchange drives [`run`]; every event for that
//! exchange is classified and dispatched from the same task, which is the
//! ordering guarantee per-exchange strategy state (historians in
//! particular) depends on.

use super::Engine;
use crate::exchange::{EventStream, ExchangeConnector, StreamEvent};
use crate::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Open a connected, flushed event stream for an exchange.
///
/// Checks websocket availability first, then connects and resubscribes
/// unless a connection attempt is already in flight.
pub async fn open_stream(exchange: &dyn ExchangeConnector) -> Result<Box<dyn EventStream>> {
    if !exchange.supports_websocket() {
        return Err(EngineError::WebsocketNotSupported(exchange.name().to_string()).into());
    }
    if !exchange.is_websocket_enabled() {
        return Err(EngineError::WebsocketNotEnabled(exchange.name().to_string()).into());
    }

    let mut stream = exchange.websocket().await?;
    if !stream.is_connecting() && !stream.is_connected() {
        stream.connect().await?;
        stream.flush_channels().await?;
    }
    Ok(stream)
}

/// Route one exchange's events until the stream ends.
///
/// The stream ending is not part of normal operation: it is returned as
/// [`EngineError::StreamEnded`] so the supervision layer can decide whether
/// to restart the exchange task. Classification errors that carry an
/// underlying cause are equally fatal and propagate that cause.
pub async fn run(engine: &Engine, exchange: &Arc<dyn ExchangeConnector>) -> Result<()> {
    let mut stream = open_stream(exchange.as_ref()).await?;

    loop {
        match stream.receiver().recv().await {
            Some(event) => route(engine, exchange, event).await?,
            None => {
                return Err(EngineError::StreamEnded(exchange.name().to_string()).into());
            }
        }
    }
}

/// Classify one decoded event and dispatch it.
///
/// Strategy handler failures are logged inside the registry fan-out and
/// never abort processing of subsequent events; only decode-contract
/// violations make this return an error.
async fn route(
    engine: &Engine,
    exchange: &Arc<dyn ExchangeConnector>,
    event: StreamEvent,
) -> Result<()> {
    metrics::counter!("stream_events_total", 1, "exchange" => exchange.name().to_string());
    let strategies = engine.strategies();
    match event {
        StreamEvent::Funding(funding) => {
            strategies.on_funding(engine, exchange, &funding).await;
        }
        StreamEvent::Price(ticker) => {
            strategies.on_price(engine, exchange, &ticker).await;
        }
        StreamEvent::Kline(kline) => {
            strategies.on_kline(engine, exchange, &kline).await;
        }
        StreamEvent::OrderBook(book) => {
            strategies.on_order_book(engine, exchange, &book).await;
        }
        StreamEvent::Order(detail) => {
            // Registry bookkeeping first: a fill observer sees the event
            // before the strategy fan-out does.
            engine.handle_order_detail(exchange, &detail).await;
            strategies.on_order(engine, exchange, &detail).await;
        }
        StreamEvent::Modify(modify) => {
            strategies.on_modify(engine, exchange, &modify).await;
        }
        StreamEvent::BalanceChange(change) => {
            strategies.on_balance_change(engine, exchange, &change).await;
        }
        StreamEvent::Trades(trades) => {
            strategies.on_trades(engine, exchange, &trades).await;
        }
        StreamEvent::Fills(fills) => {
            debug!(
                exchange = exchange.name(),
                count = fills.len(),
                "fill list received"
            );
        }
        StreamEvent::ClassificationError(classification) => {
            warn!(
                exchange = exchange.name(),
                context = %classification.context,
                "classification error on stream"
            );
            return match classification.source {
                Some(cause) => Err(cause),
                // A classification error with no cause means the decode
                // layer broke its own contract.
                None => Err(EngineError::ClassificationWithoutCause(
                    exchange.name().to_string(),
                )
                .into()),
            };
        }
        StreamEvent::UnhandledWarning(message) => {
            warn!(
                exchange = exchange.name(),
                message = %message,
                "unhandled message on stream"
            );
        }
        StreamEvent::Unknown(payload) => {
            strategies.on_unrecognized(engine, exchange, &payload).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ClassificationError, PaperExchange, Pair};
    use std::time::Duration;

    fn engine_with(exchange: Arc<PaperExchange>) -> Arc<Engine> {
        Arc::new(
            Engine::builder()
                .exchange(exchange as Arc<dyn ExchangeConnector>)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_websocket_disabled_is_typed_error() {
        let exchange = Arc::new(
            PaperExchange::new("paper", vec![(Pair::new("BTC", "USDT"), 50_000.0)])
                .with_websocket_disabled(),
        );
        let err = match open_stream(exchange.as_ref()).await {
            Ok(_) => panic!("called `Result::unwrap_err()` on an `Ok` value"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("websocket not enabled"));
    }

    #[tokio::test]
    async fn test_stream_end_is_fatal() {
        let exchange = Arc::new(
            PaperExchange::new("paper", vec![(Pair::new("BTC", "USDT"), 50_000.0)])
                .with_tick_interval(Duration::from_millis(5)),
        );
        let engine = engine_with(Arc::clone(&exchange));

        let router_exchange: Arc<dyn ExchangeConnector> = Arc::clone(&exchange) as _;
        let router_engine = Arc::clone(&engine);
        let handle =
            tokio::spawn(async move { run(router_engine.as_ref(), &router_exchange).await });

        tokio::time::sleep(Duration::from_millis(25)).await;
        exchange.close_stream().await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("ended unexpectedly"));
    }

    #[tokio::test]
    async fn test_classification_error_without_cause_is_fatal() {
        let exchange = Arc::new(
            PaperExchange::new("paper", vec![(Pair::new("BTC", "USDT"), 50_000.0)])
                .with_tick_interval(Duration::from_secs(3600)),
        );
        let engine = engine_with(Arc::clone(&exchange));

        let router_exchange: Arc<dyn ExchangeConnector> = Arc::clone(&exchange) as _;
        let router_engine = Arc::clone(&engine);
        let handle =
            tokio::spawn(async move { run(router_engine.as_ref(), &router_exchange).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        exchange
            .inject(StreamEvent::ClassificationError(ClassificationError {
                context: "trades channel".to_string(),
                source: None,
            }))
            .await
            .unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("without underlying cause"));
    }

    #[tokio::test]
    async fn test_classification_error_propagates_cause() {
        let exchange = Arc::new(
            PaperExchange::new("paper", vec![(Pair::new("BTC", "USDT"), 50_000.0)])
                .with_tick_interval(Duration::from_secs(3600)),
        );
        let engine = engine_with(Arc::clone(&exchange));

        let router_exchange: Arc<dyn ExchangeConnector> = Arc::clone(&exchange) as _;
        let router_engine = Arc::clone(&engine);
        let handle =
            tokio::spawn(async move { run(router_engine.as_ref(), &router_exchange).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        exchange
            .inject(StreamEvent::ClassificationError(ClassificationError {
                context: "kline channel".to_string(),
                source: Some(anyhow::anyhow!("malformed kline payload")),
            }))
            .await
            .unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("malformed kline payload"));
    }
}
