//! Reconciliation: periodic convergence of internal state with broker
//! reality.
//!
//! Each cycle fetches broker orders and positions, diffs them against the
//! internal working set by (symbol, action, entry within one cent), and
//! reports orphaned, missing, and mismatched entries. The broker always
//! wins: a broker-terminal order transitions the internal record even if a
//! local submission is in flight. Orphans are logged, never materialized.

mod discrepancy;

pub use discrepancy::{Discrepancy, DiscrepancyKind, PRICE_TOLERANCE, ReconciliationReport};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerClient, BrokerOrder};
use crate::config::ReconciliationConfig;
use crate::execution::ActiveOrderBook;
use crate::models::{ActiveOrderStatus, OrderState};
use crate::persistence::{PlannedOrderRow, TradingStore};
use crate::state::StateService;

/// Reconciliation failures.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Broker fetch failed.
    #[error("Broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    /// Internal state fetch failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),
}

/// Background engine converging internal state with the broker.
pub struct ReconciliationEngine {
    store: Arc<TradingStore>,
    state: Arc<StateService>,
    active_orders: Arc<ActiveOrderBook>,
    broker: Arc<dyn BrokerClient>,
    config: ReconciliationConfig,
    healthy: AtomicBool,
}

impl ReconciliationEngine {
    /// Create the engine.
    #[must_use]
    pub fn new(
        store: Arc<TradingStore>,
        state: Arc<StateService>,
        active_orders: Arc<ActiveOrderBook>,
        broker: Arc<dyn BrokerClient>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            state,
            active_orders,
            broker,
            config,
            healthy: AtomicBool::new(true),
        }
    }

    /// Whether the engine has not given up after consecutive failures.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Run one reconciliation cycle.
    pub async fn reconcile_cycle(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let start = Instant::now();
        let now = Utc::now();
        let mut report = ReconciliationReport::default();

        let broker_orders = self.broker.get_open_orders().await?;
        let broker_positions = self.broker.get_positions().await?;
        let internal_orders = self
            .store
            .load_orders_by_states(&[
                OrderState::Pending,
                OrderState::Live,
                OrderState::LiveWorking,
            ])
            .await?;

        report.broker_orders = broker_orders.len();
        report.internal_orders = internal_orders.len();

        // Phase 1: order diffs
        let mut matched_internal: Vec<i64> = Vec::new();
        for broker_order in &broker_orders {
            match find_internal_match(&internal_orders, broker_order) {
                Some(internal) => {
                    matched_internal.push(internal.id);
                    if !statuses_match(internal.status, &broker_order.status) {
                        report.discrepancies.push(Discrepancy {
                            kind: DiscrepancyKind::StatusMismatch,
                            symbol: broker_order.symbol.clone(),
                            internal_state: internal.status.as_str().to_string(),
                            broker_state: broker_order.status.clone(),
                            detected_at: now,
                        });
                        if self.sync_terminal_state(internal, broker_order).await {
                            report.synchronized += 1;
                        }
                    }
                }
                None => {
                    // Reality has an order we do not: log for audit, never
                    // adopt it as an internal live order.
                    warn!(
                        symbol = %broker_order.symbol,
                        broker_order_id = broker_order.order_id,
                        status = %broker_order.status,
                        "Orphaned broker order detected"
                    );
                    report.discrepancies.push(Discrepancy {
                        kind: DiscrepancyKind::OrphanedOrder,
                        symbol: broker_order.symbol.clone(),
                        internal_state: "NOT_FOUND".to_string(),
                        broker_state: broker_order.status.clone(),
                        detected_at: now,
                    });
                }
            }
        }

        for internal in &internal_orders {
            if matched_internal.contains(&internal.id) {
                continue;
            }
            debug!(
                symbol = %internal.order.symbol,
                status = %internal.status,
                "Internal working order missing at broker"
            );
            report.discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::MissingOrder,
                symbol: internal.order.symbol.clone(),
                internal_state: internal.status.as_str().to_string(),
                broker_state: "NOT_FOUND".to_string(),
                detected_at: now,
            });
        }

        // Phase 2: position diffs (logged; corrective action out of scope)
        report.positions_compared = broker_positions.len();
        let internal_positions = self.internal_position_quantities().await;
        for broker_position in &broker_positions {
            let internal_qty = internal_positions
                .get(&broker_position.symbol)
                .copied()
                .unwrap_or(Decimal::ZERO);
            if internal_qty != broker_position.quantity {
                warn!(
                    symbol = %broker_position.symbol,
                    internal = %internal_qty,
                    broker = %broker_position.quantity,
                    "Position quantity mismatch"
                );
                report.discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::PositionMismatch,
                    symbol: broker_position.symbol.clone(),
                    internal_state: format!("qty={internal_qty}"),
                    broker_state: format!("qty={}", broker_position.quantity),
                    detected_at: now,
                });
            }
        }

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            discrepancies = report.discrepancies.len(),
            synchronized = report.synchronized,
            broker_orders = report.broker_orders,
            internal_orders = report.internal_orders,
            duration_ms = report.duration_ms,
            "Reconciliation cycle completed"
        );
        Ok(report)
    }

    /// Broker wins: a broker-terminal order drags the internal record with
    /// it. Handles the all-or-none case of LIVE_WORKING meeting a broker
    /// Filled/Cancelled.
    async fn sync_terminal_state(
        &self,
        internal: &PlannedOrderRow,
        broker_order: &BrokerOrder,
    ) -> bool {
        let target = match broker_order.status.to_lowercase().as_str() {
            "filled" => OrderState::Filled,
            "cancelled" | "canceled" => OrderState::Cancelled,
            _ => return false,
        };

        let mut details = BTreeMap::new();
        details.insert("reason".to_string(), "synchronized from broker".to_string());
        let updated = self
            .state
            .update_planned_order_state(internal.id, target, "reconciliation", Some(details))
            .await;

        if updated {
            // Retire the tracked bracket entry for the synced order
            if let Some(active) = self.active_orders.find_by_broker_id(broker_order.order_id) {
                let status = match target {
                    OrderState::Filled => ActiveOrderStatus::Filled,
                    _ => ActiveOrderStatus::Cancelling,
                };
                self.active_orders.update_status(&active.id, status);
                self.active_orders.remove(&active.id);
            }
            info!(
                symbol = %internal.order.symbol,
                order_id = internal.id,
                target = %target,
                "Internal state synchronized from broker"
            );
        }
        updated
    }

    async fn internal_position_quantities(&self) -> HashMap<String, Decimal> {
        let mut quantities: HashMap<String, Decimal> = HashMap::new();
        for position in self.state.get_open_positions(None).await {
            if let Ok(Some(row)) = self.store.get_planned_order(position.planned_order_id).await {
                *quantities.entry(row.order.symbol).or_default() += position.filled_quantity;
            }
        }
        quantities
    }

    /// Run the reconciliation loop until shutdown.
    ///
    /// Consecutive failures back off linearly (base x errors, capped) and
    /// stop the engine as unhealthy once the error budget is spent.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = std::time::Duration::from_secs(self.config.interval_seconds);
        let mut consecutive_errors: u32 = 0;

        info!(
            interval_secs = self.config.interval_seconds,
            "Reconciliation loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep = match self.reconcile_cycle().await {
                Ok(_) => {
                    consecutive_errors = 0;
                    interval
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        error = %e,
                        consecutive_errors,
                        "Reconciliation cycle failed"
                    );
                    if consecutive_errors >= self.config.max_errors {
                        error!("Reconciliation stopping after repeated failures");
                        self.healthy.store(false, Ordering::SeqCst);
                        return;
                    }
                    let backoff = (self.config.error_backoff_base * u64::from(consecutive_errors))
                        .min(self.config.max_backoff);
                    // Small jitter so retries don't align across workers
                    let jitter = rand::rng().random_range(0..=5);
                    std::time::Duration::from_secs(backoff + jitter)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation loop stopped");
    }
}

fn find_internal_match<'a>(
    internal_orders: &'a [PlannedOrderRow],
    broker_order: &BrokerOrder,
) -> Option<&'a PlannedOrderRow> {
    let broker_price = broker_order.lmt_price.or(broker_order.aux_price)?;
    internal_orders.iter().find(|row| {
        row.order.symbol == broker_order.symbol
            && row.order.action.as_str() == broker_order.action
            && row
                .order
                .entry_price
                .is_some_and(|entry| (entry - broker_price).abs() <= PRICE_TOLERANCE)
    })
}

fn statuses_match(internal: OrderState, broker_status: &str) -> bool {
    let broker = broker_status.to_lowercase();
    match internal {
        OrderState::Pending => broker == "pendingsubmit" || broker == "presubmitted",
        OrderState::Live | OrderState::LiveWorking => {
            broker == "submitted" || broker == "presubmitted" || broker == "pendingsubmit"
        }
        OrderState::Filled => broker == "filled",
        OrderState::Cancelled => broker == "cancelled" || broker == "canceled",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerPosition, SimulatedBroker};
    use crate::models::{Action, OrderType, PlannedOrder, PositionStrategy, SecurityType};
    use rust_decimal_macros::dec;

    fn make_order(symbol: &str, entry: Decimal) -> PlannedOrder {
        PlannedOrder {
            security_type: SecurityType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            action: Action::Buy,
            symbol: symbol.to_string(),
            order_type: OrderType::Limit,
            risk_per_trade: dec!(0.005),
            entry_price: Some(entry),
            stop_loss: Some(entry - dec!(5)),
            risk_reward_ratio: dec!(2.0),
            position_strategy: PositionStrategy::Core,
            priority: 3,
            trading_setup: None,
            core_timeframe: None,
            overall_trend: None,
            brief_analysis: None,
            expiration_date: None,
        }
    }

    fn broker_order(id: i64, symbol: &str, entry: Decimal, status: &str) -> BrokerOrder {
        BrokerOrder {
            order_id: id,
            symbol: symbol.to_string(),
            action: "BUY".to_string(),
            order_type: "LMT".to_string(),
            lmt_price: Some(entry),
            aux_price: None,
            total_quantity: dec!(100),
            remaining_quantity: dec!(100),
            status: status.to_string(),
            parent_id: 99,
        }
    }

    struct Fixture {
        store: Arc<TradingStore>,
        broker: Arc<SimulatedBroker>,
        engine: ReconciliationEngine,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let state = Arc::new(StateService::new(Arc::clone(&store)));
        let broker = Arc::new(SimulatedBroker::new(dec!(100000)));
        let engine = ReconciliationEngine::new(
            Arc::clone(&store),
            state,
            Arc::new(ActiveOrderBook::new()),
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            ReconciliationConfig::default(),
        );
        Fixture {
            store,
            broker,
            engine,
        }
    }

    #[tokio::test]
    async fn test_clean_cycle() {
        let fixture = fixture().await;
        let report = fixture.engine.reconcile_cycle().await.unwrap();
        assert!(report.is_clean());
        assert!(fixture.engine.is_healthy());
    }

    #[tokio::test]
    async fn test_orphaned_broker_order_logged_not_created() {
        let fixture = fixture().await;
        fixture
            .broker
            .add_open_order(broker_order(7, "TSLA", dec!(250), "Submitted"));

        let report = fixture.engine.reconcile_cycle().await.unwrap();
        let orphans = report.of_kind(DiscrepancyKind::OrphanedOrder);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].symbol, "TSLA");

        // No internal record was materialized for the orphan
        let internal = fixture
            .store
            .load_orders_by_states(&[
                OrderState::Pending,
                OrderState::Live,
                OrderState::LiveWorking,
            ])
            .await
            .unwrap();
        assert!(internal.is_empty());
    }

    #[tokio::test]
    async fn test_missing_internal_order() {
        let fixture = fixture().await;
        let id = fixture
            .store
            .insert_planned_order(&make_order("AAPL", dec!(150)), false)
            .await
            .unwrap();
        fixture
            .store
            .update_order_status(id, OrderState::Live, None, None)
            .await
            .unwrap();

        let report = fixture.engine.reconcile_cycle().await.unwrap();
        let missing = report.of_kind(DiscrepancyKind::MissingOrder);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_entry_within_one_cent_matches() {
        let fixture = fixture().await;
        let id = fixture
            .store
            .insert_planned_order(&make_order("AAPL", dec!(150.00)), false)
            .await
            .unwrap();
        fixture
            .store
            .update_order_status(id, OrderState::Live, None, None)
            .await
            .unwrap();
        fixture
            .broker
            .add_open_order(broker_order(7, "AAPL", dec!(150.01), "Submitted"));

        let report = fixture.engine.reconcile_cycle().await.unwrap();
        assert!(report.of_kind(DiscrepancyKind::OrphanedOrder).is_empty());
        assert!(report.of_kind(DiscrepancyKind::MissingOrder).is_empty());
    }

    #[tokio::test]
    async fn test_broker_filled_wins_over_live_working() {
        let fixture = fixture().await;
        let id = fixture
            .store
            .insert_planned_order(&make_order("AAPL", dec!(150)), false)
            .await
            .unwrap();
        fixture
            .store
            .update_order_status(id, OrderState::LiveWorking, None, None)
            .await
            .unwrap();
        fixture
            .broker
            .add_open_order(broker_order(7, "AAPL", dec!(150), "Filled"));

        let report = fixture.engine.reconcile_cycle().await.unwrap();
        assert_eq!(report.of_kind(DiscrepancyKind::StatusMismatch).len(), 1);
        assert_eq!(report.synchronized, 1);
        assert_eq!(
            fixture.store.get_order_status(id).await.unwrap(),
            Some(OrderState::Filled)
        );
    }

    #[tokio::test]
    async fn test_broker_cancelled_syncs_internal() {
        let fixture = fixture().await;
        let id = fixture
            .store
            .insert_planned_order(&make_order("AAPL", dec!(150)), false)
            .await
            .unwrap();
        fixture
            .store
            .update_order_status(id, OrderState::LiveWorking, None, None)
            .await
            .unwrap();
        fixture
            .broker
            .add_open_order(broker_order(7, "AAPL", dec!(150), "Cancelled"));

        fixture.engine.reconcile_cycle().await.unwrap();
        assert_eq!(
            fixture.store.get_order_status(id).await.unwrap(),
            Some(OrderState::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_position_quantity_mismatch_logged() {
        let fixture = fixture().await;
        fixture.broker.add_position(BrokerPosition {
            symbol: "AAPL".to_string(),
            quantity: dec!(100),
            avg_cost: dec!(150),
        });

        let report = fixture.engine.reconcile_cycle().await.unwrap();
        let mismatches = report.of_kind(DiscrepancyKind::PositionMismatch);
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].broker_state.contains("qty=100"));
    }

    #[tokio::test]
    async fn test_cycle_error_surfaces() {
        let fixture = fixture().await;
        fixture.broker.set_connected(false);
        assert!(fixture.engine.reconcile_cycle().await.is_err());
    }
}
