//! Monitoring: the fixed-cadence pump driving the trading cycle, plus
//! market-data subscription management.
//!
//! Each iteration invokes the check hook, and the label hook once the
//! periodic labeling window has elapsed. Errors are counted and backed off
//! linearly; the loop stops after too many consecutive failures. Stop is
//! cooperative with a bounded join.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MonitoringConfig;
use crate::feed::MarketDataFeed;
use crate::models::PlannedOrder;

/// Bound on the time spent joining the monitor task at shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callbacks driven by the monitoring loop.
#[async_trait]
pub trait MonitorHooks: Send + Sync {
    /// Per-iteration trading check (the tick).
    async fn check(&self) -> anyhow::Result<()>;

    /// Periodic outcome labeling.
    async fn label(&self) -> anyhow::Result<()>;
}

/// Subscription statistics for reporting.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionStats {
    /// Symbols currently subscribed.
    pub total_subscriptions: usize,
    /// Updates recorded across all symbols.
    pub total_updates: u64,
    /// Symbol with the most updates, if any.
    pub most_active_symbol: Option<String>,
}

/// Tracks feed subscriptions and per-symbol update counts.
pub struct SubscriptionManager {
    feed: Arc<dyn MarketDataFeed>,
    updates: Mutex<HashMap<String, u64>>,
}

impl SubscriptionManager {
    /// Create a manager over the feed.
    #[must_use]
    pub fn new(feed: Arc<dyn MarketDataFeed>) -> Self {
        Self {
            feed,
            updates: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe every unique symbol in the order list. Returns the count
    /// of successful subscriptions.
    pub async fn subscribe_to_orders(&self, orders: &[PlannedOrder]) -> usize {
        let mut successes = 0usize;
        for order in orders {
            if self.is_subscribed(&order.symbol) {
                successes += 1;
                continue;
            }
            match self.feed.subscribe(&order.symbol).await {
                Ok(true) => {
                    if let Ok(mut updates) = self.updates.lock() {
                        updates.entry(order.symbol.clone()).or_insert(0);
                    }
                    successes += 1;
                    debug!(symbol = %order.symbol, "Subscribed");
                }
                Ok(false) => warn!(symbol = %order.symbol, "Subscription refused"),
                Err(e) => warn!(symbol = %order.symbol, error = %e, "Subscription failed"),
            }
        }
        successes
    }

    /// Whether a symbol is tracked.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.updates
            .lock()
            .is_ok_and(|updates| updates.contains_key(symbol))
    }

    /// Record one market-data update for a symbol.
    pub fn record_update(&self, symbol: &str) {
        if let Ok(mut updates) = self.updates.lock()
            && let Some(count) = updates.get_mut(symbol)
        {
            *count += 1;
        }
    }

    /// Unsubscribe one symbol.
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        match self.feed.unsubscribe(symbol).await {
            Ok(success) => {
                if success
                    && let Ok(mut updates) = self.updates.lock()
                {
                    updates.remove(symbol);
                }
                success
            }
            Err(e) => {
                warn!(symbol, error = %e, "Unsubscribe failed");
                false
            }
        }
    }

    /// Unsubscribe everything.
    pub async fn unsubscribe_all(&self) {
        let symbols: Vec<String> = self
            .updates
            .lock()
            .map(|updates| updates.keys().cloned().collect())
            .unwrap_or_default();
        for symbol in symbols {
            self.unsubscribe(&symbol).await;
        }
    }

    /// Current subscription statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let Ok(updates) = self.updates.lock() else {
            return SubscriptionStats::default();
        };
        SubscriptionStats {
            total_subscriptions: updates.len(),
            total_updates: updates.values().sum(),
            most_active_symbol: updates
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(symbol, _)| symbol.clone()),
        }
    }
}

/// Owns the background monitoring task.
pub struct MonitoringService {
    feed: Arc<dyn MarketDataFeed>,
    config: MonitoringConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MonitoringService {
    /// Create the service.
    #[must_use]
    pub fn new(feed: Arc<dyn MarketDataFeed>, config: MonitoringConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            feed,
            config,
            shutdown_tx,
            shutdown_rx,
            handle: Mutex::new(None),
        }
    }

    /// Start the loop. Returns false when the feed is not connected or the
    /// loop is already running.
    pub fn start(&self, hooks: Arc<dyn MonitorHooks>) -> bool {
        if !self.feed.is_connected() {
            error!("Cannot start monitoring - data feed not connected");
            return false;
        }
        let Ok(mut handle) = self.handle.lock() else {
            return false;
        };
        if handle.is_some() {
            warn!("Monitoring already running");
            return false;
        }

        let config = self.config.clone();
        let shutdown = self.shutdown_rx.clone();
        *handle = Some(tokio::spawn(monitoring_loop(hooks, config, shutdown)));
        info!(
            interval_secs = self.config.interval_seconds,
            "Monitoring started"
        );
        true
    }

    /// Stop the loop: flip the flag and join with a bounded wait.
    /// In-flight iterations are allowed to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().ok().and_then(|mut handle| handle.take());
        if let Some(handle) = handle
            && tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err()
        {
            warn!("Monitoring task did not terminate cleanly");
        }
        info!("Monitoring stopped");
    }
}

async fn monitoring_loop(
    hooks: Arc<dyn MonitorHooks>,
    config: MonitoringConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(config.interval_seconds);
    let labeling_window = chrono::Duration::minutes(
        i64::try_from(config.labeling_interval_minutes).unwrap_or(10),
    );
    let mut last_labeling: Option<DateTime<Utc>> = None;
    let mut consecutive_errors: u32 = 0;

    info!("Monitoring loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let iteration = async {
            hooks.check().await?;

            let due = last_labeling.is_none_or(|at| Utc::now() - at >= labeling_window);
            if due {
                hooks.label().await?;
                last_labeling = Some(Utc::now());
                debug!("Periodic labeling completed");
            }
            anyhow::Ok(())
        };

        let sleep = match iteration.await {
            Ok(()) => {
                consecutive_errors = 0;
                interval
            }
            Err(e) => {
                consecutive_errors += 1;
                error!(
                    error = %e,
                    consecutive_errors,
                    max_errors = config.max_errors,
                    "Monitoring iteration failed"
                );
                if consecutive_errors >= config.max_errors {
                    error!("Too many monitoring errors, stopping loop");
                    return;
                }
                let backoff = (config.error_backoff_base * u64::from(consecutive_errors))
                    .min(config.max_backoff);
                Duration::from_secs(backoff)
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

    info!("Monitoring loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MockFeed;
    use crate::models::{Action, OrderType, PositionStrategy, SecurityType};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    struct CountingHooks {
        checks: AtomicU32,
        labels: AtomicU32,
        fail_checks: bool,
    }

    #[async_trait]
    impl MonitorHooks for CountingHooks {
        async fn check(&self) -> anyhow::Result<()> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_checks {
                anyhow::bail!("induced check failure");
            }
            Ok(())
        }

        async fn label(&self) -> anyhow::Result<()> {
            self.labels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_subscription_tracking() {
        let feed = Arc::new(MockFeed::new());
        let manager = SubscriptionManager::new(Arc::clone(&feed) as Arc<dyn MarketDataFeed>);

        let orders = vec![make_order("AAPL"), make_order("MSFT"), make_order("AAPL")];
        let count = manager.subscribe_to_orders(&orders).await;
        assert_eq!(count, 3); // duplicate counts as already-subscribed success
        assert_eq!(feed.subscriptions().len(), 2);

        manager.record_update("AAPL");
        manager.record_update("AAPL");
        manager.record_update("MSFT");

        let stats = manager.stats();
        assert_eq!(stats.total_subscriptions, 2);
        assert_eq!(stats.total_updates, 3);
        assert_eq!(stats.most_active_symbol.as_deref(), Some("AAPL"));

        assert!(manager.unsubscribe("AAPL").await);
        assert!(!manager.is_subscribed("AAPL"));
        assert_eq!(manager.stats().total_subscriptions, 1);

        manager.unsubscribe_all().await;
        assert_eq!(manager.stats().total_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_start_requires_connected_feed() {
        let feed = Arc::new(MockFeed::new());
        feed.set_connected(false);
        let service = MonitoringService::new(
            Arc::clone(&feed) as Arc<dyn MarketDataFeed>,
            MonitoringConfig::default(),
        );
        let hooks = Arc::new(CountingHooks {
            checks: AtomicU32::new(0),
            labels: AtomicU32::new(0),
            fail_checks: false,
        });
        assert!(!service.start(hooks));
    }

    #[tokio::test]
    async fn test_loop_invokes_hooks_and_stops() {
        let feed = Arc::new(MockFeed::new());
        let config = MonitoringConfig {
            interval_seconds: 1,
            ..Default::default()
        };
        let service = MonitoringService::new(Arc::clone(&feed) as Arc<dyn MarketDataFeed>, config);
        let hooks = Arc::new(CountingHooks {
            checks: AtomicU32::new(0),
            labels: AtomicU32::new(0),
            fail_checks: false,
        });

        assert!(service.start(Arc::clone(&hooks) as Arc<dyn MonitorHooks>));
        // Second start refused while running
        assert!(!service.start(Arc::clone(&hooks) as Arc<dyn MonitorHooks>));

        tokio::time::sleep(Duration::from_millis(100)).await;
        service.stop().await;

        assert!(hooks.checks.load(Ordering::SeqCst) >= 1);
        // First iteration runs the label hook (window starts elapsed)
        assert_eq!(hooks.labels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_after_max_errors() {
        let feed = Arc::new(MockFeed::new());
        let config = MonitoringConfig {
            interval_seconds: 1,
            max_errors: 3,
            error_backoff_base: 1,
            max_backoff: 2,
            ..Default::default()
        };
        let hooks = Arc::new(CountingHooks {
            checks: AtomicU32::new(0),
            labels: AtomicU32::new(0),
            fail_checks: true,
        });

        let (_, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitoring_loop(
            Arc::clone(&hooks) as Arc<dyn MonitorHooks>,
            config,
            shutdown_rx,
        ));

        // Paused time auto-advances through the backoffs; the loop must
        // terminate on its own after three failures.
        handle.await.unwrap();
        assert_eq!(hooks.checks.load(Ordering::SeqCst), 3);
        // Keep the feed alive for the duration of the test
        assert!(feed.is_connected());
    }
}
