//! State service: the single authority for planned-order status and
//! position closure, with synchronous state-change pub/sub.
//!
//! Every accepted mutation commits through the store and then publishes an
//! `OrderEvent` to subscribers of `"order_state_change"`. A failing
//! subscriber never blocks delivery to the rest.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use crate::models::{Action, ExecutedOrder, OrderEvent, OrderState};
use crate::persistence::TradingStore;

/// Event type emitted on every accepted state mutation.
pub const ORDER_STATE_CHANGE: &str = "order_state_change";

type Subscriber = Box<dyn Fn(&OrderEvent) + Send + Sync>;

/// Single source of truth for order state transitions.
pub struct StateService {
    store: Arc<TradingStore>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl StateService {
    /// Create a state service over the given store.
    #[must_use]
    pub fn new(store: Arc<TradingStore>) -> Self {
        Self {
            store,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a callback for an event type.
    pub fn subscribe(&self, event_type: &str, callback: Subscriber) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers
                .entry(event_type.to_string())
                .or_default()
                .push(callback);
        }
    }

    /// Number of subscribers for an event type.
    #[must_use]
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .ok()
            .map_or(0, |subscribers| {
                subscribers.get(event_type).map_or(0, Vec::len)
            })
    }

    fn publish(&self, event: &OrderEvent) {
        let Ok(subscribers) = self.subscribers.read() else {
            return;
        };
        for callback in subscribers.get(ORDER_STATE_CHANGE).into_iter().flatten() {
            // One panicking subscriber must not starve the others
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    order_id = event.order_id,
                    "State-change subscriber panicked"
                );
            }
        }
    }

    /// Current state of a planned order.
    pub async fn get_planned_order_state(&self, order_id: i64) -> Option<OrderState> {
        self.store.get_order_status(order_id).await.ok().flatten()
    }

    /// Transition a planned order to `new_state` and publish the change.
    ///
    /// Same-state writes are no-ops returning true. Transitions out of a
    /// terminal state are rejected. Persistence failure returns false with
    /// the mutation not applied.
    pub async fn update_planned_order_state(
        &self,
        order_id: i64,
        new_state: OrderState,
        source: &str,
        details: Option<BTreeMap<String, String>>,
    ) -> bool {
        let Some(old_state) = self.get_planned_order_state(order_id).await else {
            warn!(order_id, "Order not found for state update");
            return false;
        };

        if old_state == new_state {
            return true;
        }

        if old_state.is_terminal() {
            warn!(
                order_id,
                old_state = %old_state,
                new_state = %new_state,
                "Rejected transition out of terminal state"
            );
            return false;
        }

        let reason = details
            .as_ref()
            .and_then(|details| details.get("reason").cloned());
        if let Err(e) = self
            .store
            .update_order_status(order_id, new_state, reason.as_deref(), None)
            .await
        {
            error!(order_id, error = %e, "Failed to persist state transition");
            return false;
        }

        let symbol = self
            .store
            .get_planned_order(order_id)
            .await
            .ok()
            .flatten()
            .map(|row| row.order.symbol)
            .unwrap_or_default();

        let mut event = OrderEvent::now(order_id, symbol, old_state, new_state, source);
        if let Some(details) = details {
            event.details = details;
        }
        self.publish(&event);

        debug!(
            order_id,
            old_state = %old_state,
            new_state = %new_state,
            source,
            "Order state updated"
        );
        true
    }

    /// Record broker order ids against a planned order without changing state.
    pub async fn attach_broker_order_ids(&self, order_id: i64, broker_ids: &[i64]) -> bool {
        match self.get_planned_order_state(order_id).await {
            Some(state) => self
                .store
                .update_order_status(order_id, state, None, Some(broker_ids))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// All open positions, optionally filtered by symbol.
    pub async fn get_open_positions(&self, symbol: Option<&str>) -> Vec<ExecutedOrder> {
        self.store.open_positions(symbol).await.unwrap_or_default()
    }

    /// Whether an open position exists for a symbol.
    pub async fn has_open_position(&self, symbol: &str) -> bool {
        !self.get_open_positions(Some(symbol)).await.is_empty()
    }

    /// Close a position at `close_price`, computing side-aware realized P&L.
    ///
    /// Returns the realized P&L on success.
    pub async fn close_position(
        &self,
        execution_id: i64,
        close_price: Decimal,
        commission: Decimal,
    ) -> Option<Decimal> {
        let execution = self.store.get_execution(execution_id).await.ok().flatten()?;
        if !execution.is_open {
            return None;
        }

        let planned = self
            .store
            .get_planned_order(execution.planned_order_id)
            .await
            .ok()
            .flatten()?;

        let quantity = execution.filled_quantity;
        let gross = match planned.order.action {
            Action::Buy => (close_price - execution.filled_price) * quantity,
            Action::Sell | Action::ShortSell => (execution.filled_price - close_price) * quantity,
        };
        let pnl = gross - commission - execution.commission;

        if let Err(e) = self.store.close_execution(execution_id, pnl, Utc::now()).await {
            error!(execution_id, error = %e, "Failed to close position");
            return None;
        }

        debug!(execution_id, %pnl, "Position closed");
        Some(pnl)
    }

    /// Retire a planned order (transition to CANCELLED).
    pub async fn retire_planned_order(&self, order_id: i64, source: &str) -> bool {
        let mut details = BTreeMap::new();
        details.insert(
            "reason".to_string(),
            "retired via lifecycle management".to_string(),
        );
        self.update_planned_order_state(order_id, OrderState::Cancelled, source, Some(details))
            .await
    }
}
