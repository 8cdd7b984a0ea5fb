//! Bracket-order manager: first-trigger-first-serve activation of
//! mutually-exclusive orders under a shared capital ceiling.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::orchestrator::ExecutionOrchestrator;
use crate::models::PlannedOrder;

/// One order competing for the shared capital pool.
#[derive(Debug, Clone)]
pub struct BracketRequest {
    /// The order to activate when capital allows.
    pub order: PlannedOrder,
    /// Probability at enqueue time.
    pub fill_probability: f64,
    /// Notional the order commits when active.
    pub capital_commitment: Decimal,
    /// Ceiling on simultaneous commitments for this set.
    pub total_capital: Decimal,
}

#[derive(Debug, Clone)]
struct ActiveBracket {
    request: BracketRequest,
    activated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
struct ManagerState {
    active: HashMap<String, ActiveBracket>,
    inactive: VecDeque<BracketRequest>,
}

/// Manages a set of bracket orders where only some may hold committed
/// capital at a time.
pub struct BracketOrderManager {
    orchestrator: Arc<ExecutionOrchestrator>,
    state: Mutex<ManagerState>,
}

impl BracketOrderManager {
    /// Create a manager activating through the given orchestrator.
    #[must_use]
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>) -> Self {
        Self {
            orchestrator,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Add an order: activate it immediately when its commitment fits under
    /// the ceiling, else queue it inactive.
    pub async fn add_order(&self, request: BracketRequest) -> Option<String> {
        let fits = {
            let state = self.state.lock().await;
            let committed: Decimal = state
                .active
                .values()
                .map(|bracket| bracket.request.capital_commitment)
                .sum();
            committed + request.capital_commitment <= request.total_capital
        };

        if fits {
            self.activate(request).await
        } else {
            info!(
                symbol = %request.order.symbol,
                "Order queued inactive (capital limit reached)"
            );
            self.state.lock().await.inactive.push_back(request);
            None
        }
    }

    async fn activate(&self, request: BracketRequest) -> Option<String> {
        let outcome = self
            .orchestrator
            .execute_single_order(&request.order, request.fill_probability)
            .await;

        if outcome.is_success() {
            let id = Uuid::new_v4().to_string();
            info!(symbol = %request.order.symbol, bracket_id = %id, "Bracket activated");
            self.state.lock().await.active.insert(
                id.clone(),
                ActiveBracket {
                    request,
                    activated_at: Utc::now(),
                },
            );
            Some(id)
        } else {
            warn!(symbol = %request.order.symbol, ?outcome, "Bracket activation failed");
            None
        }
    }

    /// Handle an exit (fill, stop-out, manual close): free the capital and
    /// reactivate whatever now fits, in FIFO order.
    pub async fn handle_exit(&self, bracket_id: &str, exit_reason: &str) {
        let removed = self.state.lock().await.active.remove(bracket_id);
        match removed {
            Some(bracket) => {
                info!(
                    bracket_id,
                    symbol = %bracket.request.order.symbol,
                    exit_reason,
                    held_since = %bracket.activated_at,
                    "Bracket exited"
                );
                self.reactivate_inactive().await;
            }
            None => warn!(bracket_id, "No active bracket found for exit"),
        }
    }

    /// Cancel one active bracket at the broker, then run a reactivation scan.
    pub async fn cancel_order(&self, bracket_id: &str, active_order_id: &str) {
        let removed = self.state.lock().await.active.remove(bracket_id);
        if removed.is_none() {
            warn!(bracket_id, "No active bracket found to cancel");
            return;
        }
        self.orchestrator.cancel_active_order(active_order_id).await;
        self.reactivate_inactive().await;
    }

    /// Remove the first inactive entry for a symbol.
    pub async fn cancel_inactive_order(&self, symbol: &str) -> bool {
        let mut state = self.state.lock().await;
        let position = state
            .inactive
            .iter()
            .position(|request| request.order.symbol == symbol);
        match position {
            Some(index) => {
                state.inactive.remove(index);
                info!(symbol, "Inactive order removed from queue");
                true
            }
            None => {
                warn!(symbol, "No inactive order found for symbol");
                false
            }
        }
    }

    /// FIFO scan of the inactive queue, activating whatever fits now.
    async fn reactivate_inactive(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                if state.inactive.is_empty() {
                    return;
                }
                let committed: Decimal = state
                    .active
                    .values()
                    .map(|bracket| bracket.request.capital_commitment)
                    .sum();

                let position = state.inactive.iter().position(|request| {
                    committed + request.capital_commitment <= request.total_capital
                });
                match position {
                    Some(index) => state.inactive.remove(index),
                    None => return,
                }
            };

            if let Some(request) = next {
                self.activate(request).await;
            }
        }
    }

    /// Count of active brackets.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    /// Count of queued inactive orders.
    pub async fn inactive_count(&self) -> usize {
        self.state.lock().await.inactive.len()
    }
}
