//! Locked book of tracked active orders.
//!
//! Inserted by the execution orchestrator, status-updated by
//! reconciliation, read by the monitoring pump. All access goes through
//! one lock; snapshots are cloned out so callers never hold it.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{ActiveOrder, ActiveOrderStatus, OrderKey, PlannedOrder};

/// Shared map of in-flight brackets.
#[derive(Debug, Default)]
pub struct ActiveOrderBook {
    orders: Mutex<HashMap<String, ActiveOrder>>,
}

impl ActiveOrderBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly submitted order.
    pub fn insert(&self, order: ActiveOrder) {
        if let Ok(mut orders) = self.orders.lock() {
            orders.insert(order.id.clone(), order);
        }
    }

    /// Fetch by engine id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ActiveOrder> {
        self.orders
            .lock()
            .ok()
            .and_then(|orders| orders.get(id).cloned())
    }

    /// Fetch the order tracking a given broker order id.
    #[must_use]
    pub fn find_by_broker_id(&self, broker_order_id: i64) -> Option<ActiveOrder> {
        self.orders.lock().ok().and_then(|orders| {
            orders
                .values()
                .find(|order| order.broker_order_ids.contains(&broker_order_id))
                .cloned()
        })
    }

    /// Update the status of a tracked order.
    pub fn update_status(&self, id: &str, status: ActiveOrderStatus) -> bool {
        self.orders.lock().ok().is_some_and(|mut orders| {
            orders
                .get_mut(id)
                .map(|order| order.status = status)
                .is_some()
        })
    }

    /// Remove a tracked order (terminal at the broker).
    pub fn remove(&self, id: &str) -> Option<ActiveOrder> {
        self.orders.lock().ok().and_then(|mut orders| orders.remove(id))
    }

    /// Snapshot of all tracked orders.
    #[must_use]
    pub fn all(&self) -> Vec<ActiveOrder> {
        self.orders
            .lock()
            .map(|orders| orders.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of working orders only.
    #[must_use]
    pub fn working(&self) -> Vec<ActiveOrder> {
        self.orders
            .lock()
            .map(|orders| {
                orders
                    .values()
                    .filter(|order| order.is_working())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of working orders.
    #[must_use]
    pub fn working_count(&self) -> usize {
        self.orders
            .lock()
            .map(|orders| orders.values().filter(|order| order.is_working()).count())
            .unwrap_or(0)
    }

    /// Whether a working order with the same natural key exists.
    #[must_use]
    pub fn has_duplicate(&self, order: &PlannedOrder) -> bool {
        let Ok(key) = order.key() else {
            return false;
        };
        self.matches_key(&key)
    }

    fn matches_key(&self, key: &OrderKey) -> bool {
        self.orders.lock().is_ok_and(|orders| {
            orders.values().any(|active| {
                active.is_working()
                    && active
                        .planned_order
                        .key()
                        .is_ok_and(|active_key| active_key == *key)
            })
        })
    }
}
