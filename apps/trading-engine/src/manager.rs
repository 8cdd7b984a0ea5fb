//! Trading manager: wires every service together, owns the worker
//! lifecycles, and drives the per-tick decision pipeline.
//!
//! Tick flow: reload planned orders from all sources, refresh
//! subscriptions, score fill probability per order, prioritize and
//! allocate, gate through risk, and hand allocated orders to the
//! execution orchestrator. Reconciliation and end-of-day run as
//! independent workers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::config::Config;
use crate::eod::EndOfDayService;
use crate::execution::{ActiveOrderBook, ExecutionOrchestrator};
use crate::feed::MarketDataFeed;
use crate::labeling::OutcomeLabelingService;
use crate::loading::{OrderLoadingOrchestrator, OrderSource, PlanSource};
use crate::monitoring::{MonitorHooks, MonitoringService, SubscriptionManager};
use crate::persistence::TradingStore;
use crate::prioritization::{
    HistoricalPerformanceService, OrderCandidate, PrioritizationService,
};
use crate::probability::FillProbabilityEngine;
use crate::risk::{RiskDecision, RiskManagementService};
use crate::reconciliation::ReconciliationEngine;
use crate::sizing::PositionSizingService;
use crate::state::StateService;

/// Seconds between end-of-day window polls.
const EOD_POLL_SECS: u64 = 60;

/// Bound on worker joins at shutdown.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Results of one tick for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSummary {
    /// Orders in the merged plan.
    pub orders_loaded: usize,
    /// Orders that received a probability evaluation.
    pub orders_evaluated: usize,
    /// Orders awarded capital by the allocator.
    pub orders_allocated: usize,
    /// Orders submitted (live or simulated).
    pub orders_executed: usize,
    /// Orders blocked by the risk gate.
    pub risk_blocked: usize,
}

/// Top-level assembly of the trading engine.
pub struct TradingManager {
    store: Arc<TradingStore>,
    state: Arc<StateService>,
    broker: Option<Arc<dyn BrokerClient>>,
    loader: OrderLoadingOrchestrator,
    probability: FillProbabilityEngine,
    prioritization: PrioritizationService,
    risk: Arc<RiskManagementService>,
    execution: Arc<ExecutionOrchestrator>,
    active_orders: Arc<ActiveOrderBook>,
    labeling: OutcomeLabelingService,
    eod: Arc<EndOfDayService>,
    reconciliation: Option<Arc<ReconciliationEngine>>,
    monitoring: MonitoringService,
    subscriptions: SubscriptionManager,
    plan_source: Option<Box<dyn PlanSource>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TradingManager {
    /// Assemble the engine from its collaborators.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<TradingStore>,
        feed: Arc<dyn MarketDataFeed>,
        broker: Option<Arc<dyn BrokerClient>>,
        plan_source: Option<Box<dyn PlanSource>>,
    ) -> Self {
        let state = Arc::new(StateService::new(Arc::clone(&store)));
        let active_orders = Arc::new(ActiveOrderBook::new());

        let account_number = broker
            .as_ref()
            .filter(|b| b.connected())
            .and_then(|b| b.account_number());

        let risk = Arc::new(RiskManagementService::new(
            Arc::clone(&store),
            config.risk_limits.clone(),
            account_number,
        ));

        let performance = Arc::new(HistoricalPerformanceService::new(Arc::clone(&store)));
        let prioritization = PrioritizationService::new(
            PositionSizingService::new(),
            config.prioritization.clone(),
            config.risk_limits.clone(),
            None,
            Some(performance),
        );

        let execution = Arc::new(ExecutionOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&state),
            Arc::clone(&active_orders),
            broker.clone(),
            config.execution.clone(),
            config.risk_limits.clone(),
            config.simulation.clone(),
            config.prioritization.two_layer_enabled,
        ));

        let eod = Arc::new(EndOfDayService::new(
            Arc::clone(&store),
            Arc::clone(&state),
            Arc::clone(&risk),
            Arc::clone(&feed),
            config.end_of_day.clone(),
        ));

        let reconciliation = broker.clone().map(|broker| {
            Arc::new(ReconciliationEngine::new(
                Arc::clone(&store),
                Arc::clone(&state),
                Arc::clone(&active_orders),
                broker,
                config.reconciliation.clone(),
            ))
        });

        let loader = OrderLoadingOrchestrator::new(
            Arc::clone(&store),
            broker.clone(),
            config.order_defaults.clone(),
        );
        let mut probability = FillProbabilityEngine::new(Arc::clone(&feed));
        probability.execution_threshold = config.execution.fill_probability_threshold;
        let monitoring = MonitoringService::new(Arc::clone(&feed), config.monitoring.clone());
        let subscriptions = SubscriptionManager::new(Arc::clone(&feed));
        let labeling = OutcomeLabelingService::new(Arc::clone(&store));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            store,
            state,
            broker,
            loader,
            probability,
            prioritization,
            risk,
            execution,
            active_orders,
            labeling,
            eod,
            reconciliation,
            monitoring,
            subscriptions,
            plan_source,
            shutdown_tx,
            shutdown_rx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The state service (for subscribers and tests).
    #[must_use]
    pub fn state(&self) -> Arc<StateService> {
        Arc::clone(&self.state)
    }

    /// The active-order book.
    #[must_use]
    pub fn active_orders(&self) -> Arc<ActiveOrderBook> {
        Arc::clone(&self.active_orders)
    }

    /// The durable store.
    #[must_use]
    pub fn store(&self) -> Arc<TradingStore> {
        Arc::clone(&self.store)
    }

    /// Start the monitoring pump and the background workers.
    pub fn start(self: &Arc<Self>) -> bool {
        self.eod.reset_daily_state();

        let started = self
            .monitoring
            .start(Arc::clone(self) as Arc<dyn MonitorHooks>);
        if !started {
            return false;
        }

        let Ok(mut workers) = self.workers.lock() else {
            return false;
        };

        if let Some(reconciliation) = &self.reconciliation {
            let engine = Arc::clone(reconciliation);
            let shutdown = self.shutdown_rx.clone();
            workers.push(tokio::spawn(async move {
                engine.run_loop(shutdown).await;
            }));
        }

        let eod = Arc::clone(&self.eod);
        let mut shutdown = self.shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            let interval = Duration::from_secs(EOD_POLL_SECS);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let report = eod.run_eod_process().await;
                debug!(status = ?report.status, "EOD poll");
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }));

        info!(
            live = self.execution.is_live_trading(),
            broker_connected = self.broker.as_ref().is_some_and(|b| b.connected()),
            "Trading manager started"
        );
        true
    }

    /// Stop everything: monitoring first, then the workers, with bounded
    /// joins so shutdown completes in bounded time.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.monitoring.stop().await;

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut workers| workers.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Worker did not terminate within the join timeout");
            }
        }
        info!("Trading manager stopped");
    }

    /// One pass of the trading-decision pipeline.
    pub async fn run_tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let (sourced_orders, _loading) = self
            .loader
            .load_all_orders(self.plan_source.as_deref())
            .await;
        summary.orders_loaded = sourced_orders.len();
        if sourced_orders.is_empty() {
            return summary;
        }

        // Keep the feed warm for every merged symbol
        let planned: Vec<_> = sourced_orders.iter().map(|s| s.order.clone()).collect();
        self.subscriptions.subscribe_to_orders(&planned).await;

        let equity = self.execution.resolve_equity().await;
        let is_live = self.execution.is_live_trading();
        let account = self.execution.account_number();

        // Probability evaluation. Broker-discovered orders are audit-only
        // and never become execution candidates.
        let mut candidates = Vec::new();
        for sourced in &sourced_orders {
            if sourced.source == OrderSource::Broker {
                continue;
            }

            let Some(evaluation) = self.probability.evaluate(&sourced.order).await else {
                continue;
            };
            summary.orders_evaluated += 1;

            let db_id = match self.store.ensure_planned_order(&sourced.order, is_live).await {
                Ok((id, _)) => Some(id),
                Err(e) => {
                    warn!(symbol = %sourced.order.symbol, error = %e, "Failed to persist planned order");
                    None
                }
            };
            if let Some(id) = db_id {
                self.probability
                    .persist_evaluation(&self.store, id, &evaluation, account.as_deref())
                    .await;
            }

            candidates.push(OrderCandidate {
                order: sourced.order.clone(),
                db_id,
                fill_probability: evaluation.fill_probability,
            });
        }

        if candidates.is_empty() {
            return summary;
        }

        let working = self.active_orders.working();
        let scored = self
            .prioritization
            .prioritize_orders(candidates, equity, &working)
            .await;

        for entry in scored.iter().filter(|s| s.allocated) {
            summary.orders_allocated += 1;

            let mut order = entry.candidate.order.clone();
            let active_snapshot = self.active_orders.all();
            match self
                .risk
                .can_place_order(&mut order, &active_snapshot, equity)
                .await
            {
                RiskDecision::Allowed => {}
                RiskDecision::Halted(reason) => {
                    warn!(reason, "Trading halted, skipping remaining allocations");
                    summary.risk_blocked += scored.iter().filter(|s| s.allocated).count()
                        - summary.orders_executed;
                    break;
                }
                RiskDecision::Rejected(reason) => {
                    debug!(symbol = %order.symbol, reason, "Risk gate rejected order");
                    summary.risk_blocked += 1;
                    continue;
                }
            }

            let outcome = self
                .execution
                .execute_single_order(&order, entry.candidate.fill_probability)
                .await;
            if outcome.is_success() {
                summary.orders_executed += 1;
            }
        }

        info!(
            loaded = summary.orders_loaded,
            evaluated = summary.orders_evaluated,
            allocated = summary.orders_allocated,
            executed = summary.orders_executed,
            risk_blocked = summary.risk_blocked,
            equity = %equity,
            "Tick completed"
        );
        summary
    }

    /// Equity in effect this tick.
    pub async fn current_equity(&self) -> Decimal {
        self.execution.resolve_equity().await
    }
}

#[async_trait]
impl MonitorHooks for TradingManager {
    async fn check(&self) -> anyhow::Result<()> {
        self.run_tick().await;
        Ok(())
    }

    async fn label(&self) -> anyhow::Result<()> {
        self.labeling.label_completed_orders(24).await;
        Ok(())
    }
}
