//! State-change events published by the state service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::order::OrderState;

/// Event published on every accepted planned-order state mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Database row id of the planned order.
    pub order_id: i64,
    /// Instrument symbol.
    pub symbol: String,
    /// State before the mutation.
    pub old_state: OrderState,
    /// State after the mutation.
    pub new_state: OrderState,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// Component that requested the mutation.
    pub source: String,
    /// Free-form context for subscribers.
    pub details: BTreeMap<String, String>,
}

impl OrderEvent {
    /// Build an event for a transition observed now.
    #[must_use]
    pub fn now(
        order_id: i64,
        symbol: impl Into<String>,
        old_state: OrderState,
        new_state: OrderState,
        source: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            symbol: symbol.into(),
            old_state,
            new_state,
            timestamp: Utc::now(),
            source: source.into(),
            details: BTreeMap::new(),
        }
    }

    /// Attach a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
