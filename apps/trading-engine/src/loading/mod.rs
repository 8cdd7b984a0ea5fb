//! Order-loading orchestrator.
//!
//! Merges planned orders from up to three sources into one deduplicated
//! list per tick. Broker-discovered orders are authoritative over database
//! rows, which are authoritative over the plan sheet. Failure of any one
//! source never blocks the others.

mod plan;

pub use plan::{PlanRow, PlanSource, PlanSourceError, StaticPlanSource, basic_row, row_to_order};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, BrokerOrder};
use crate::config::OrderDefaultsConfig;
use crate::models::{
    Action, OrderKey, OrderState, OrderType, PlannedOrder, PositionStrategy, SecurityType,
};
use crate::persistence::TradingStore;

/// Where a loaded order came from. Higher priority wins merge conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSource {
    /// Discovered on the broker's book.
    Broker,
    /// Resumed from the database.
    Database,
    /// Parsed from the plan sheet.
    Spreadsheet,
}

impl OrderSource {
    /// Merge priority; higher is more authoritative.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Broker => 3,
            Self::Database => 2,
            Self::Spreadsheet => 1,
        }
    }

    /// Label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "BROKER",
            Self::Database => "DATABASE",
            Self::Spreadsheet => "SPREADSHEET",
        }
    }
}

/// Intermediate loader record: an order plus its provenance.
#[derive(Debug, Clone)]
pub struct SourcedOrder {
    /// The loaded order.
    pub order: PlannedOrder,
    /// Which source produced it.
    pub source: OrderSource,
    /// When this record was imported; breaks equal-priority conflicts.
    pub imported_at: DateTime<Utc>,
    /// Database row id, when already persisted.
    pub db_id: Option<i64>,
}

/// Per-tick loading statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadingSummary {
    /// Orders resumed from the database.
    pub database: usize,
    /// Valid orders parsed from the plan sheet.
    pub spreadsheet: usize,
    /// Orders discovered at the broker.
    pub broker: usize,
    /// Final merged count.
    pub merged: usize,
    /// Conflicts resolved away during the merge.
    pub duplicates_removed: usize,
    /// Sources that contributed without failing.
    pub sources_loaded: usize,
}

/// Merges orders from database, plan sheet, and broker.
pub struct OrderLoadingOrchestrator {
    store: Arc<TradingStore>,
    broker: Option<Arc<dyn BrokerClient>>,
    defaults: OrderDefaultsConfig,
}

impl OrderLoadingOrchestrator {
    /// Create the orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<TradingStore>,
        broker: Option<Arc<dyn BrokerClient>>,
        defaults: OrderDefaultsConfig,
    ) -> Self {
        Self {
            store,
            broker,
            defaults,
        }
    }

    /// Load orders from every available source and merge the results.
    pub async fn load_all_orders(
        &self,
        plan_source: Option<&dyn PlanSource>,
    ) -> (Vec<SourcedOrder>, LoadingSummary) {
        let mut all_orders: Vec<SourcedOrder> = Vec::new();
        let mut summary = LoadingSummary::default();

        match self.load_from_database().await {
            Ok(orders) => {
                summary.database = orders.len();
                summary.sources_loaded += 1;
                info!(count = orders.len(), "Database: active orders resumed");
                all_orders.extend(orders);
            }
            Err(e) => warn!(error = %e, "Database loading failed"),
        }

        if let Some(source) = plan_source {
            match self.load_from_plan(source).await {
                Ok(orders) => {
                    summary.spreadsheet = orders.len();
                    summary.sources_loaded += 1;
                    info!(count = orders.len(), "Plan sheet: orders loaded");
                    all_orders.extend(orders);
                }
                Err(e) => warn!(error = %e, "Plan sheet loading failed"),
            }
        }

        match self.discover_broker_orders().await {
            Ok(orders) => {
                if !orders.is_empty() || self.broker.as_ref().is_some_and(|b| b.connected()) {
                    summary.sources_loaded += 1;
                }
                summary.broker = orders.len();
                info!(count = orders.len(), "Broker: working orders discovered");
                all_orders.extend(orders);
            }
            Err(e) => warn!(error = %e, "Broker discovery failed"),
        }

        let total = all_orders.len();
        let merged = Self::merge_orders(all_orders);
        summary.merged = merged.len();
        summary.duplicates_removed = total - merged.len();

        info!(
            database = summary.database,
            spreadsheet = summary.spreadsheet,
            broker = summary.broker,
            merged = summary.merged,
            duplicates_removed = summary.duplicates_removed,
            "Order loading completed"
        );
        (merged, summary)
    }

    /// Resume working orders from the database, dropping cross-session
    /// orders whose strategy has expired.
    async fn load_from_database(&self) -> Result<Vec<SourcedOrder>, crate::persistence::PersistenceError> {
        let rows = self
            .store
            .load_orders_by_states(&[OrderState::Pending, OrderState::Live, OrderState::LiveWorking])
            .await?;

        let today = Utc::now().date_naive();
        let mut resumed = Vec::new();
        let mut expired = 0usize;

        for row in rows {
            let created_date = row.created_at.date_naive();
            let keep = match row.order.position_strategy {
                PositionStrategy::Day => created_date >= today,
                PositionStrategy::Hybrid => (today - created_date).num_days() <= 10,
                PositionStrategy::Core => true,
            };

            if keep {
                debug!(symbol = %row.order.symbol, strategy = row.order.position_strategy.as_str(), "Resuming order");
                resumed.push(SourcedOrder {
                    order: row.order,
                    source: OrderSource::Database,
                    imported_at: row.created_at,
                    db_id: Some(row.id),
                });
            } else {
                expired += 1;
                debug!(
                    symbol = %row.order.symbol,
                    strategy = row.order.position_strategy.as_str(),
                    "Not resuming expired order"
                );
            }
        }

        if expired > 0 {
            info!(resumed = resumed.len(), expired, "Database resume summary");
        }
        Ok(resumed)
    }

    /// Parse, validate, and dedupe plan-sheet rows.
    async fn load_from_plan(
        &self,
        source: &dyn PlanSource,
    ) -> Result<Vec<SourcedOrder>, PlanSourceError> {
        let rows = source.fetch_rows()?;
        let imported_at = Utc::now();

        let mut valid: Vec<SourcedOrder> = Vec::new();
        let mut seen: Vec<OrderKey> = Vec::new();
        let mut invalid = 0usize;
        let mut duplicates = 0usize;

        for (index, row) in rows.iter().enumerate() {
            let order = match row_to_order(row, &self.defaults) {
                Ok(order) => order,
                Err(e) => {
                    warn!(row = index + 2, symbol = %row.symbol, error = %e, "Skipping invalid plan row");
                    invalid += 1;
                    continue;
                }
            };

            let Ok(key) = order.key() else {
                invalid += 1;
                continue;
            };

            if seen.contains(&key) {
                debug!(symbol = %order.symbol, "Skipping duplicate plan row");
                duplicates += 1;
                continue;
            }

            // Rows already persisted with the same natural key are resumed
            // from the database source instead.
            match self.store.find_planned_order_id(&key).await {
                Ok(Some(_)) => {
                    debug!(symbol = %order.symbol, "Plan row already in database");
                    duplicates += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol = %order.symbol, error = %e, "Duplicate check failed, keeping row");
                }
            }

            seen.push(key);
            valid.push(SourcedOrder {
                order,
                source: OrderSource::Spreadsheet,
                imported_at,
                db_id: None,
            });
        }

        if invalid > 0 || duplicates > 0 {
            info!(
                valid = valid.len(),
                invalid, duplicates, "Plan sheet validation summary"
            );
        }
        Ok(valid)
    }

    /// Discover working orders on the broker book that likely belong to
    /// this engine. Audit-visibility only: discovered orders carry
    /// placeholder risk parameters and are never resumed as live orders.
    async fn discover_broker_orders(
        &self,
    ) -> Result<Vec<SourcedOrder>, crate::broker::BrokerError> {
        let Some(broker) = &self.broker else {
            return Ok(vec![]);
        };
        if !broker.connected() {
            debug!("Broker not connected, skipping discovery");
            return Ok(vec![]);
        }

        let open_orders = broker.get_open_orders().await?;
        let imported_at = Utc::now();
        let mut discovered = Vec::new();

        for broker_order in &open_orders {
            if !broker_order.looks_like_bracket_leg() {
                continue;
            }
            let Some(order) = convert_broker_order(broker_order) else {
                continue;
            };

            // Only CORE/HYBRID survive across sessions; DAY never resumes.
            if !matches!(
                order.position_strategy,
                PositionStrategy::Core | PositionStrategy::Hybrid
            ) {
                continue;
            }

            let Some(entry) = order.entry_price else {
                continue;
            };
            match self
                .store
                .find_by_symbol_action_entry(&order.symbol, order.action, entry)
                .await
            {
                Ok(Some(_)) => {
                    debug!(symbol = %order.symbol, "Broker order already tracked in database");
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol = %order.symbol, error = %e, "Broker dedup check failed");
                    continue;
                }
            }

            discovered.push(SourcedOrder {
                order,
                source: OrderSource::Broker,
                imported_at,
                db_id: None,
            });
        }

        Ok(discovered)
    }

    /// Bucket by natural key and resolve conflicts by source priority,
    /// then import recency, then first-seen.
    fn merge_orders(orders: Vec<SourcedOrder>) -> Vec<SourcedOrder> {
        let mut merged: Vec<SourcedOrder> = Vec::new();
        let mut index_by_key: HashMap<OrderKey, usize> = HashMap::new();

        for candidate in orders {
            let Ok(key) = candidate.order.key() else {
                // Orders without both prices cannot collide; keep them.
                merged.push(candidate);
                continue;
            };

            match index_by_key.get(&key) {
                None => {
                    index_by_key.insert(key, merged.len());
                    merged.push(candidate);
                }
                Some(&index) => {
                    let existing = &merged[index];
                    let replace = match candidate
                        .source
                        .priority()
                        .cmp(&existing.source.priority())
                    {
                        std::cmp::Ordering::Greater => true,
                        std::cmp::Ordering::Less => false,
                        std::cmp::Ordering::Equal => candidate.imported_at > existing.imported_at,
                    };

                    info!(
                        key = %key,
                        kept = if replace { candidate.source.as_str() } else { existing.source.as_str() },
                        dropped = if replace { existing.source.as_str() } else { candidate.source.as_str() },
                        "Order conflict resolved"
                    );

                    if replace {
                        merged[index] = candidate;
                    }
                }
            }
        }

        merged
    }
}

/// Materialize a broker order into a planned order for audit visibility.
///
/// Risk parameters are placeholders (risk 1%, reward 2:1, CORE): the
/// deterministic reverse mapping is undefined, so these records are never
/// submitted or persisted as live orders.
fn convert_broker_order(broker_order: &BrokerOrder) -> Option<PlannedOrder> {
    let action = Action::parse(&broker_order.action).ok()?;
    let order_type = OrderType::parse(&broker_order.order_type).ok()?;
    let entry = broker_order.lmt_price.or(broker_order.aux_price)?;
    let stop = broker_order.aux_price.filter(|aux| *aux != entry)?;

    let order = PlannedOrder {
        security_type: SecurityType::Stk,
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        action,
        symbol: broker_order.symbol.clone(),
        order_type,
        risk_per_trade: Decimal::new(1, 2),
        entry_price: Some(entry),
        stop_loss: Some(stop),
        risk_reward_ratio: Decimal::new(2, 0),
        position_strategy: PositionStrategy::Core,
        priority: 3,
        trading_setup: None,
        core_timeframe: None,
        overall_trend: None,
        brief_analysis: None,
        expiration_date: None,
    };
    order.validate().ok()?;
    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimulatedBroker;
    use rust_decimal_macros::dec;

    fn sourced(symbol: &str, source: OrderSource, imported_at: DateTime<Utc>) -> SourcedOrder {
        let row = basic_row(symbol, "BUY", dec!(150), dec!(145));
        SourcedOrder {
            order: row_to_order(&row, &OrderDefaultsConfig::default()).unwrap(),
            source,
            imported_at,
            db_id: None,
        }
    }

    #[test]
    fn test_merge_prefers_higher_priority_source() {
        let now = Utc::now();
        let merged = OrderLoadingOrchestrator::merge_orders(vec![
            sourced("AAPL", OrderSource::Spreadsheet, now),
            sourced("AAPL", OrderSource::Broker, now - chrono::Duration::hours(1)),
            sourced("AAPL", OrderSource::Database, now),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, OrderSource::Broker);
    }

    #[test]
    fn test_merge_equal_priority_prefers_newer_import() {
        let now = Utc::now();
        let merged = OrderLoadingOrchestrator::merge_orders(vec![
            sourced("AAPL", OrderSource::Spreadsheet, now - chrono::Duration::hours(1)),
            sourced("AAPL", OrderSource::Spreadsheet, now),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].imported_at, now);
    }

    #[test]
    fn test_merge_keeps_distinct_keys() {
        let now = Utc::now();
        let mut other = sourced("MSFT", OrderSource::Spreadsheet, now);
        other.order.entry_price = Some(dec!(300));
        other.order.stop_loss = Some(dec!(295));
        let merged = OrderLoadingOrchestrator::merge_orders(vec![
            sourced("AAPL", OrderSource::Spreadsheet, now),
            other,
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn test_load_plan_skips_invalid_and_duplicate_rows() {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let orchestrator =
            OrderLoadingOrchestrator::new(store, None, OrderDefaultsConfig::default());

        let mut bad = basic_row("BAD", "BUY", dec!(150), dec!(155)); // stop above entry
        bad.position_strategy = None;
        let rows = vec![
            basic_row("AAPL", "BUY", dec!(150), dec!(145)),
            basic_row("AAPL", "BUY", dec!(150), dec!(145)), // in-batch duplicate
            bad,
            basic_row("MSFT", "SELL", dec!(300), dec!(305)),
        ];
        let source = StaticPlanSource::new(rows);

        let (orders, summary) = orchestrator.load_all_orders(Some(&source)).await;
        assert_eq!(orders.len(), 2);
        assert_eq!(summary.spreadsheet, 2);
        assert_eq!(summary.database, 0);
    }

    #[tokio::test]
    async fn test_plan_rows_already_in_database_are_skipped() {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let order = row_to_order(
            &basic_row("AAPL", "BUY", dec!(150), dec!(145)),
            &OrderDefaultsConfig::default(),
        )
        .unwrap();
        store.insert_planned_order(&order, false).await.unwrap();

        let orchestrator =
            OrderLoadingOrchestrator::new(Arc::clone(&store), None, OrderDefaultsConfig::default());
        let source = StaticPlanSource::new(vec![basic_row("AAPL", "BUY", dec!(150), dec!(145))]);

        let (orders, summary) = orchestrator.load_all_orders(Some(&source)).await;
        // The DB copy wins; the sheet row is a duplicate
        assert_eq!(summary.database, 1);
        assert_eq!(summary.spreadsheet, 0);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].source, OrderSource::Database);
    }

    #[tokio::test]
    async fn test_loading_is_idempotent_within_session() {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let orchestrator =
            OrderLoadingOrchestrator::new(store, None, OrderDefaultsConfig::default());
        let source = StaticPlanSource::new(vec![
            basic_row("AAPL", "BUY", dec!(150), dec!(145)),
            basic_row("MSFT", "SELL", dec!(300), dec!(305)),
        ]);

        let (first, _) = orchestrator.load_all_orders(Some(&source)).await;
        let (second, _) = orchestrator.load_all_orders(Some(&source)).await;
        assert_eq!(first.len(), second.len());
        let keys =
            |orders: &[SourcedOrder]| -> Vec<_> { orders.iter().map(|o| o.order.key().unwrap()).collect() };
        assert_eq!(keys(&first), keys(&second));
    }

    #[tokio::test]
    async fn test_broker_discovery_filters_and_dedupes() {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let broker = Arc::new(SimulatedBroker::new(dec!(100000)));

        // Resumable bracket leg
        broker.add_open_order(crate::broker::BrokerOrder {
            order_id: 1,
            symbol: "TSLA".to_string(),
            action: "BUY".to_string(),
            order_type: "LMT".to_string(),
            lmt_price: Some(dec!(250)),
            aux_price: Some(dec!(245)),
            total_quantity: dec!(10),
            remaining_quantity: dec!(10),
            status: "Submitted".to_string(),
            parent_id: 99,
        });
        // Standalone order (no parent): not ours
        broker.add_open_order(crate::broker::BrokerOrder {
            order_id: 2,
            symbol: "GME".to_string(),
            action: "BUY".to_string(),
            order_type: "LMT".to_string(),
            lmt_price: Some(dec!(20)),
            aux_price: Some(dec!(18)),
            total_quantity: dec!(10),
            remaining_quantity: dec!(10),
            status: "Submitted".to_string(),
            parent_id: 0,
        });

        let orchestrator = OrderLoadingOrchestrator::new(
            Arc::clone(&store),
            Some(broker),
            OrderDefaultsConfig::default(),
        );
        let (orders, summary) = orchestrator.load_all_orders(None).await;
        assert_eq!(summary.broker, 1);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order.symbol, "TSLA");
        assert_eq!(orders[0].source, OrderSource::Broker);
    }

    #[tokio::test]
    async fn test_source_failure_does_not_block_others() {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let broker = Arc::new(SimulatedBroker::new(dec!(100000)));
        broker.set_connected(false);

        let orchestrator = OrderLoadingOrchestrator::new(
            store,
            Some(broker),
            OrderDefaultsConfig::default(),
        );
        let source = StaticPlanSource::new(vec![basic_row("AAPL", "BUY", dec!(150), dec!(145))]);

        let (orders, _) = orchestrator.load_all_orders(Some(&source)).await;
        assert_eq!(orders.len(), 1);
    }
}
