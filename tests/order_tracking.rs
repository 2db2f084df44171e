//! Exactly-once order tracking through the engine surface

use std::sync::Arc;
use std::time::Duration;
use strategy_engine::exchange::{
    AssetClass, ExchangeConnector, OrderSide, OrderSubmission, PaperExchange, Pair,
};
use strategy_engine::Engine;

fn engine_with_paper() -> (Arc<Engine>, Arc<PaperExchange>) {
    let exchange = Arc::new(
        PaperExchange::new("paper", vec![(Pair::new("BTC", "USDT"), 50_000.0)])
            .with_tick_interval(Duration::from_secs(3600)),
    );
    let engine = Arc::new(
        Engine::builder()
            .exchange(Arc::clone(&exchange) as Arc<dyn ExchangeConnector>)
            .build()
            .unwrap(),
    );
    (engine, exchange)
}

fn submission(id: &str) -> OrderSubmission {
    OrderSubmission {
        pair: Pair::new("BTC", "USDT"),
        asset_class: AssetClass::Spot,
        side: OrderSide::Sell,
        amount: 0.2,
        price: 51_000.0,
        client_order_id: Some(id.to_string()),
    }
}

#[tokio::test]
async fn distinct_orders_all_register() {
    let (engine, _exchange) = engine_with_paper();

    let mut handles = Vec::new();
    for index in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .submit_order("paper", submission(&format!("order-{index}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(engine.orders().len(), 8);
    for index in 0..8 {
        assert!(engine
            .order_value("paper", &format!("order-{index}"))
            .is_some());
    }
}

#[tokio::test]
async fn duplicate_submission_is_reported_not_overwritten() {
    let (engine, _exchange) = engine_with_paper();

    engine
        .submit_order("paper", submission("repeat"))
        .await
        .unwrap();
    let duplicate = engine.submit_order("paper", submission("repeat")).await;

    let err = duplicate.unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(engine.orders().len(), 1);
}

#[tokio::test]
async fn modify_falls_back_to_cancel_and_resubmit() {
    let (engine, _exchange) = engine_with_paper();

    let placed = engine
        .submit_order("paper", submission("to-modify"))
        .await
        .unwrap();

    // Modifying an order the exchange no longer knows forces the
    // cancel-and-resubmit fallback, which registers a fresh order id.
    let modified = engine
        .modify_order(
            "paper",
            strategy_engine::exchange::OrderModify {
                order_id: "vanished".to_string(),
                pair: Pair::new("BTC", "USDT"),
                asset_class: AssetClass::Spot,
                side: OrderSide::Sell,
                price: 52_000.0,
                amount: 0.2,
            },
        )
        .await
        .unwrap();

    assert_ne!(modified.order_id, placed.order_id);
    assert_eq!(engine.orders().len(), 2);
}
