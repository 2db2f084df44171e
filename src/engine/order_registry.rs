//! Exactly-once order bookkeeping

use super::OnFilled;
use crate::exchange::SubmitResponse;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identifies one order across all connected exchanges
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    /// Exchange the order lives on
    pub exchange_name: String,
    /// Exchange-assigned order identifier
    pub order_id: String,
}

/// What the registry remembers about one submitted order
#[derive(Clone)]
pub struct OrderValue {
    /// The exchange's submission response
    pub response: SubmitResponse,
    /// Caller-supplied context, invoked when the order fills
    pub observer: Option<Arc<dyn OnFilled>>,
}

/// Concurrent first-writer-wins store of submitted orders.
///
/// For a given key at most one value is ever stored; later stores are no-ops
/// reported to the caller. The entry count moves only on a successful
/// insert, so it stays exact under concurrent stores of the same key.
#[derive(Default)]
pub struct OrderRegistry {
    length: AtomicUsize,
    values: DashMap<OrderKey, OrderValue>,
}

impl OrderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submission under `(exchange_name, response.order_id)`.
    ///
    /// Returns `true` iff this call performed the insert. A `false` return
    /// means the key already existed and nothing was overwritten.
    pub fn store(
        &self,
        exchange_name: &str,
        response: SubmitResponse,
        observer: Option<Arc<dyn OnFilled>>,
    ) -> bool {
        let key = OrderKey {
            exchange_name: exchange_name.to_lowercase(),
            order_id: response.order_id.clone(),
        };
        match self.values.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(OrderValue {
                    response,
                    observer,
                });
                self.length.fetch_add(1, Ordering::SeqCst);
                metrics::counter!("orders_registered_total", 1);
                true
            }
        }
    }

    /// Look up the stored value for an order
    pub fn get(&self, exchange_name: &str, order_id: &str) -> Option<OrderValue> {
        let key = OrderKey {
            exchange_name: exchange_name.to_lowercase(),
            order_id: order_id.to_string(),
        };
        self.values.get(&key).map(|entry| entry.value().clone())
    }

    /// Exact count of distinct stored orders
    pub fn len(&self) -> usize {
        self.length.load(Ordering::SeqCst)
    }

    /// Whether no orders have been stored yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, Pair};
    use chrono::Utc;

    fn response(order_id: &str) -> SubmitResponse {
        SubmitResponse {
            order_id: order_id.to_string(),
            placed: true,
            pair: Pair::new("BTC", "USDT"),
            side: OrderSide::Buy,
            amount: 1.0,
            price: 50_000.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_store_and_get() {
        let registry = OrderRegistry::new();
        assert!(registry.store("ftx", response("fake-order-id"), None));

        let value = registry.get("ftx", "fake-order-id").unwrap();
        assert_eq!(value.response.order_id, "fake-order-id");
        assert!(value.response.placed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_store_is_rejected() {
        let registry = OrderRegistry::new();
        assert!(registry.store("ftx", response("fake-order-id"), None));
        assert!(!registry.store("ftx", response("fake-order-id"), None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_order_id_on_two_exchanges() {
        let registry = OrderRegistry::new();
        assert!(registry.store("ftx", response("shared-id"), None));
        assert!(registry.store("kraken", response("shared-id"), None));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_missing_order() {
        let registry = OrderRegistry::new();
        registry.store("ftx", response("fake-order-id"), None);
        assert!(registry.get("ftx", "other-id").is_none());
        assert!(registry.get("kraken", "fake-order-id").is_none());
    }

    #[test]
    fn test_exchange_name_is_case_insensitive() {
        let registry = OrderRegistry::new();
        assert!(registry.store("Kraken", response("fake-order-id"), None));
        assert!(registry.get("kraken", "fake-order-id").is_some());
        assert!(!registry.store("KRAKEN", response("fake-order-id"), None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_store_counts_once() {
        let registry = std::sync::Arc::new(OrderRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = std::sync::Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.store("ftx", response("contended-id"), None)
            }));
        }
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|stored| *stored)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }
}
