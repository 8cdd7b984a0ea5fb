//! Execution orchestrator: viability, sizing, margin, submission, tracking.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::active_orders::ActiveOrderBook;
use crate::broker::BrokerClient;
use crate::config::{ExecutionConfig, RiskLimitsConfig, SimulationConfig};
use crate::models::{ActiveOrder, ActiveOrderStatus, OrderState, PlannedOrder};
use crate::persistence::TradingStore;
use crate::sizing::PositionSizingService;
use crate::state::StateService;

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Bracket submitted and tracked.
    Submitted,
    /// Filled immediately in simulation.
    SimulatedFill,
    /// Rejected before reaching the broker, with reason.
    Rejected(String),
    /// Broker refused the bracket, with reason.
    BrokerRejected(String),
}

impl ExecutionOutcome {
    /// Whether the order made it onto the book (live or simulated).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Submitted | Self::SimulatedFill)
    }
}

/// Drives a single chosen order from sizing to a tracked active order.
pub struct ExecutionOrchestrator {
    store: Arc<TradingStore>,
    state: Arc<StateService>,
    sizing: PositionSizingService,
    active_orders: Arc<ActiveOrderBook>,
    broker: Option<Arc<dyn BrokerClient>>,
    execution_config: ExecutionConfig,
    risk_limits: RiskLimitsConfig,
    simulation: SimulationConfig,
    two_layer_enabled: bool,
}

impl ExecutionOrchestrator {
    /// Create the orchestrator.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<TradingStore>,
        state: Arc<StateService>,
        active_orders: Arc<ActiveOrderBook>,
        broker: Option<Arc<dyn BrokerClient>>,
        execution_config: ExecutionConfig,
        risk_limits: RiskLimitsConfig,
        simulation: SimulationConfig,
        two_layer_enabled: bool,
    ) -> Self {
        Self {
            store,
            state,
            sizing: PositionSizingService::new(),
            active_orders,
            broker,
            execution_config,
            risk_limits,
            simulation,
            two_layer_enabled,
        }
    }

    /// The shared active-order book.
    #[must_use]
    pub fn active_orders(&self) -> Arc<ActiveOrderBook> {
        Arc::clone(&self.active_orders)
    }

    /// Live account value when connected, configured default otherwise.
    pub async fn resolve_equity(&self) -> Decimal {
        if let Some(broker) = &self.broker
            && broker.connected()
            && let Ok(value) = broker.get_account_value().await
        {
            return value;
        }
        self.simulation.default_equity
    }

    /// Live trading iff connected to a non-paper account.
    #[must_use]
    pub fn is_live_trading(&self) -> bool {
        self.broker
            .as_ref()
            .is_some_and(|broker| broker.connected() && !broker.is_paper_account())
    }

    /// Account identifier when connected.
    #[must_use]
    pub fn account_number(&self) -> Option<String> {
        self.broker
            .as_ref()
            .filter(|broker| broker.connected())
            .and_then(|broker| broker.account_number())
    }

    /// Execute one order chosen by prioritization.
    pub async fn execute_single_order(
        &self,
        order: &PlannedOrder,
        fill_probability: f64,
    ) -> ExecutionOutcome {
        let equity = self.resolve_equity().await;
        let is_live = self.is_live_trading();
        let account = self.account_number();

        // Effective priority sequences the audit log
        let effective_priority = f64::from(order.priority) * fill_probability;
        info!(
            symbol = %order.symbol,
            fill_probability,
            effective_priority,
            is_live,
            "Executing order"
        );

        let Some(entry_price) = order.entry_price else {
            return self
                .reject(order, None, "Missing entry price for execution")
                .await;
        };
        let (quantity, capital_commitment) =
            match self.sizing.calculate_order_quantity(order, equity) {
                Ok(quantity) => (quantity, entry_price * quantity),
                Err(e) => {
                    return self.reject(order, None, &format!("Sizing failed: {e}")).await;
                }
            };

        // Viability gates. The probability gate belongs to the legacy path
        // only; the two-layer pipeline already sequenced on probability.
        if !self.two_layer_enabled
            && fill_probability < self.execution_config.min_fill_probability
        {
            return self
                .reject(
                    order,
                    None,
                    &format!(
                        "Fill probability below threshold ({fill_probability:.2} < {:.2})",
                        self.execution_config.min_fill_probability
                    ),
                )
                .await;
        }

        if self.state.has_open_position(&order.symbol).await {
            return self
                .reject(order, None, &format!("Open position exists for {}", order.symbol))
                .await;
        }

        if self.active_orders.has_duplicate(order) {
            return self.reject(order, None, "Identical active order exists").await;
        }

        if self.active_orders.working_count() >= self.risk_limits.max_open_orders {
            return self.reject(order, None, "Maximum open orders reached").await;
        }

        // Persist the order (if new) and mark it EXECUTING
        let (db_id, _) = match self.store.ensure_planned_order(order, is_live).await {
            Ok(result) => result,
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "Failed to persist planned order");
                return ExecutionOutcome::Rejected(format!("Persistence failed: {e}"));
            }
        };
        self.state
            .update_planned_order_state(
                db_id,
                OrderState::Executing,
                "execution",
                Some(detail("reason", &format!("fill_prob={fill_probability:.2}"))),
            )
            .await;

        // Margin gate
        let (margin_ok, margin_message) = self.store.validate_sufficient_margin(
            order.security_type,
            quantity,
            entry_price,
            equity,
        );
        if !margin_ok {
            return self.reject(order, Some(db_id), &margin_message).await;
        }

        match &self.broker {
            Some(broker) if broker.connected() => {
                self.submit_bracket(
                    order,
                    db_id,
                    quantity,
                    capital_commitment,
                    fill_probability,
                    equity,
                    is_live,
                    account,
                    Arc::clone(broker),
                )
                .await
            }
            _ => self.simulate_fill(order, db_id, quantity).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit_bracket(
        &self,
        order: &PlannedOrder,
        db_id: i64,
        quantity: Decimal,
        capital_commitment: Decimal,
        fill_probability: f64,
        equity: Decimal,
        is_live: bool,
        account: Option<String>,
        broker: Arc<dyn BrokerClient>,
    ) -> ExecutionOutcome {
        let broker_ids = match broker.place_bracket_order(order, quantity, equity).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "Bracket submission failed");
                self.reject(order, Some(db_id), &format!("Broker rejection: {e}"))
                    .await;
                return ExecutionOutcome::BrokerRejected(e.to_string());
            }
        };

        self.state
            .update_planned_order_state(db_id, OrderState::Live, "execution", None)
            .await;
        self.state.attach_broker_order_ids(db_id, &broker_ids).await;

        // Not a fill yet: the execution row is SUBMITTED until the broker
        // reports the entry leg filled.
        let entry_price = order.entry_price.unwrap_or_default();
        if let Err(e) = self
            .store
            .record_execution(
                db_id,
                order.position_strategy,
                entry_price,
                quantity,
                Decimal::ZERO,
                "SUBMITTED",
                is_live,
                account.as_deref(),
            )
            .await
        {
            warn!(symbol = %order.symbol, error = %e, "Failed to record submission");
        }

        let active = ActiveOrder {
            id: Uuid::new_v4().to_string(),
            planned_order: order.clone(),
            broker_order_ids: broker_ids.clone(),
            planned_order_db_id: db_id,
            status: ActiveOrderStatus::Submitted,
            capital_commitment,
            fill_probability,
            submitted_at: Utc::now(),
            is_live_trading: is_live,
            account_number: account,
        };
        info!(
            symbol = %order.symbol,
            active_id = %active.id,
            ?broker_ids,
            %capital_commitment,
            "Bracket submitted and tracked"
        );
        self.active_orders.insert(active);
        ExecutionOutcome::Submitted
    }

    /// No broker connection: fill at the entry price with zero commission.
    async fn simulate_fill(
        &self,
        order: &PlannedOrder,
        db_id: i64,
        quantity: Decimal,
    ) -> ExecutionOutcome {
        let entry_price = order.entry_price.unwrap_or_default();
        self.state
            .update_planned_order_state(db_id, OrderState::Filled, "simulation", None)
            .await;

        if let Err(e) = self
            .store
            .record_execution(
                db_id,
                order.position_strategy,
                entry_price,
                quantity,
                Decimal::ZERO,
                "FILLED",
                false,
                None,
            )
            .await
        {
            warn!(symbol = %order.symbol, error = %e, "Failed to record simulated fill");
        }

        info!(symbol = %order.symbol, %quantity, %entry_price, "Simulated fill");
        ExecutionOutcome::SimulatedFill
    }

    /// Cancel a tracked active order at the broker and retire it.
    pub async fn cancel_active_order(&self, active_id: &str) -> bool {
        let Some(active) = self.active_orders.get(active_id) else {
            warn!(active_id, "No active order found to cancel");
            return false;
        };

        self.active_orders
            .update_status(active_id, ActiveOrderStatus::Cancelling);

        if let Some(broker) = &self.broker
            && broker.connected()
        {
            for broker_id in &active.broker_order_ids {
                if let Err(e) = broker.cancel_order(*broker_id).await {
                    warn!(broker_id, error = %e, "Broker cancel failed");
                }
            }
        }

        self.state
            .update_planned_order_state(
                active.planned_order_db_id,
                OrderState::Cancelled,
                "execution",
                Some(detail("reason", "cancel requested")),
            )
            .await;
        self.active_orders.remove(active_id);
        true
    }

    async fn reject(
        &self,
        order: &PlannedOrder,
        db_id: Option<i64>,
        reason: &str,
    ) -> ExecutionOutcome {
        warn!(symbol = %order.symbol, reason, "Order rejected");
        if let Some(db_id) = db_id {
            self.state
                .update_planned_order_state(
                    db_id,
                    OrderState::Cancelled,
                    "execution",
                    Some(detail("reason", reason)),
                )
                .await;
        }
        ExecutionOutcome::Rejected(reason.to_string())
    }
}

fn detail(key: &str, value: &str) -> BTreeMap<String, String> {
    let mut details = BTreeMap::new();
    details.insert(key.to_string(), value.to_string());
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimulatedBroker;
    use crate::models::{Action, OrderType, PositionStrategy, SecurityType};
    use rust_decimal_macros::dec;

    fn make_order(symbol: &str) -> PlannedOrder {
        PlannedOrder {
            security_type: SecurityType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            action: Action::Buy,
            symbol: symbol.to_string(),
            order_type: OrderType::Limit,
            risk_per_trade: dec!(0.005),
            entry_price: Some(dec!(150)),
            stop_loss: Some(dec!(145)),
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

    struct Fixture {
        store: Arc<TradingStore>,
        orchestrator: ExecutionOrchestrator,
        broker: Option<Arc<SimulatedBroker>>,
    }

    async fn fixture(with_broker: bool, two_layer: bool) -> Fixture {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let state = Arc::new(StateService::new(Arc::clone(&store)));
        let book = Arc::new(ActiveOrderBook::new());
        let broker = with_broker.then(|| Arc::new(SimulatedBroker::new(dec!(100000))));
        let orchestrator = ExecutionOrchestrator::new(
            Arc::clone(&store),
            state,
            book,
            broker
                .clone()
                .map(|b| b as Arc<dyn BrokerClient>),
            ExecutionConfig::default(),
            RiskLimitsConfig::default(),
            SimulationConfig::default(),
            two_layer,
        );
        Fixture {
            store,
            orchestrator,
            broker,
        }
    }

    #[tokio::test]
    async fn test_live_submission_tracks_active_order() {
        let fixture = fixture(true, true).await;
        let order = make_order("AAPL");

        let outcome = fixture.orchestrator.execute_single_order(&order, 0.9).await;
        assert_eq!(outcome, ExecutionOutcome::Submitted);

        let book = fixture.orchestrator.active_orders();
        assert_eq!(book.working_count(), 1);
        let active = &book.working()[0];
        assert_eq!(active.broker_order_ids.len(), 3);
        assert_eq!(active.capital_commitment, dec!(15000));

        // Status LIVE with broker ids recorded
        let key = order.key().unwrap();
        let db_id = fixture.store.find_planned_order_id(&key).await.unwrap().unwrap();
        let row = fixture.store.get_planned_order(db_id).await.unwrap().unwrap();
        assert_eq!(row.status, OrderState::Live);
        assert_eq!(row.broker_order_ids.len(), 3);

        // Execution row is SUBMITTED, not an open position yet
        assert!(fixture.store.open_positions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simulation_fills_at_entry() {
        let fixture = fixture(false, true).await;
        let order = make_order("AAPL");

        let outcome = fixture.orchestrator.execute_single_order(&order, 0.9).await;
        assert_eq!(outcome, ExecutionOutcome::SimulatedFill);

        let open = fixture.store.open_positions(None).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].filled_price, dec!(150));
        assert_eq!(open[0].commission, dec!(0));
    }

    #[tokio::test]
    async fn test_duplicate_active_order_rejected() {
        let fixture = fixture(true, true).await;
        let order = make_order("AAPL");

        assert!(fixture
            .orchestrator
            .execute_single_order(&order, 0.9)
            .await
            .is_success());
        let outcome = fixture.orchestrator.execute_single_order(&order, 0.9).await;
        assert!(matches!(outcome, ExecutionOutcome::Rejected(_)));
        assert_eq!(fixture.orchestrator.active_orders().working_count(), 1);
    }

    #[tokio::test]
    async fn test_open_position_blocks_resubmission() {
        let fixture = fixture(false, true).await;
        let order = make_order("AAPL");

        // Simulated fill opens a position
        fixture.orchestrator.execute_single_order(&order, 0.9).await;

        let mut second = make_order("AAPL");
        second.entry_price = Some(dec!(151));
        second.stop_loss = Some(dec!(146));
        let outcome = fixture.orchestrator.execute_single_order(&second, 0.9).await;
        match outcome {
            ExecutionOutcome::Rejected(reason) => assert!(reason.contains("Open position")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_legacy_probability_gate() {
        let fixture = fixture(true, false).await;
        let order = make_order("AAPL");

        let outcome = fixture.orchestrator.execute_single_order(&order, 0.2).await;
        match outcome {
            ExecutionOutcome::Rejected(reason) => {
                assert!(reason.contains("Fill probability below threshold"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // Two-layer path does not gate on probability
        let fixture = fixture_two_layer_low_prob().await;
        let outcome = fixture.orchestrator.execute_single_order(&order, 0.2).await;
        assert!(outcome.is_success());
    }

    async fn fixture_two_layer_low_prob() -> Fixture {
        fixture(true, true).await
    }

    #[tokio::test]
    async fn test_broker_rejection_cancels_order() {
        let fixture = fixture(true, true).await;
        fixture.broker.as_ref().unwrap().set_reject_all(true);
        let order = make_order("AAPL");

        let outcome = fixture.orchestrator.execute_single_order(&order, 0.9).await;
        assert!(matches!(outcome, ExecutionOutcome::BrokerRejected(_)));

        let key = order.key().unwrap();
        let db_id = fixture.store.find_planned_order_id(&key).await.unwrap().unwrap();
        let row = fixture.store.get_planned_order(db_id).await.unwrap().unwrap();
        assert_eq!(row.status, OrderState::Cancelled);
        assert!(row.status_reason.unwrap().contains("Broker rejection"));
    }

    #[tokio::test]
    async fn test_margin_failure_cancels_order() {
        let fixture = fixture(true, true).await;
        // Tight stop forces a notional far beyond 80% of equity at 50% margin
        let mut order = make_order("AAPL");
        order.risk_per_trade = dec!(0.02);
        order.stop_loss = Some(dec!(149.90));

        let outcome = fixture.orchestrator.execute_single_order(&order, 0.9).await;
        match outcome {
            ExecutionOutcome::Rejected(reason) => {
                assert!(reason.contains("Insufficient margin"));
            }
            other => panic!("expected margin rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_open_orders_gate() {
        let fixture = fixture(true, true).await;
        let mut limits_hit = 0;
        for i in 0..7 {
            let mut order = make_order(&format!("SYM{i}"));
            order.entry_price = Some(dec!(150) + Decimal::from(i));
            order.stop_loss = Some(dec!(145) + Decimal::from(i));
            let outcome = fixture.orchestrator.execute_single_order(&order, 0.9).await;
            if matches!(&outcome, ExecutionOutcome::Rejected(reason) if reason.contains("Maximum open orders"))
            {
                limits_hit += 1;
            }
        }
        // Default max_open_orders = 5, so two of seven hit the gate
        assert_eq!(limits_hit, 2);
        assert_eq!(fixture.orchestrator.active_orders().working_count(), 5);
    }

    #[tokio::test]
    async fn test_cancel_active_order() {
        let fixture = fixture(true, true).await;
        let order = make_order("AAPL");
        fixture.orchestrator.execute_single_order(&order, 0.9).await;

        let active_id = fixture.orchestrator.active_orders().working()[0].id.clone();
        assert!(fixture.orchestrator.cancel_active_order(&active_id).await);
        assert_eq!(fixture.orchestrator.active_orders().working_count(), 0);

        let key = order.key().unwrap();
        let db_id = fixture.store.find_planned_order_id(&key).await.unwrap().unwrap();
        assert_eq!(
            fixture.store.get_order_status(db_id).await.unwrap(),
            Some(OrderState::Cancelled)
        );
    }
}
