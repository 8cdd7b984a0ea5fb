//! Outcome labeling: derives ML training labels from executed orders.
//!
//! Labels are keyed by (planned order, label kind), so re-running the
//! labeler overwrites in place and never accumulates rows.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};

use crate::models::{Action, ExecutedOrder, LabelKind, OrderLabel};
use crate::persistence::{PlannedOrderRow, TradingStore};

/// Probability above which a prediction counts as a high-confidence call.
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Results of one labeling pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelingSummary {
    /// Executions considered.
    pub total_orders: usize,
    /// Executions that produced at least one label.
    pub labeled_orders: usize,
    /// Labels written (including overwrites).
    pub labels_written: usize,
    /// Executions that failed to label.
    pub errors: usize,
}

/// Derives outcome labels from execution results.
pub struct OutcomeLabelingService {
    store: Arc<TradingStore>,
}

impl OutcomeLabelingService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<TradingStore>) -> Self {
        Self { store }
    }

    /// Label all filled executions from the trailing window.
    pub async fn label_completed_orders(&self, hours_back: i64) -> LabelingSummary {
        let cutoff = Utc::now() - Duration::hours(hours_back);
        let executions = match self.store.filled_executions_since(cutoff).await {
            Ok(executions) => executions,
            Err(e) => {
                warn!(error = %e, "Failed to load executions for labeling");
                return LabelingSummary::default();
            }
        };

        let mut summary = LabelingSummary {
            total_orders: executions.len(),
            ..Default::default()
        };

        for execution in &executions {
            match self.label_single_order(execution).await {
                Ok(written) if written > 0 => {
                    summary.labeled_orders += 1;
                    summary.labels_written += written;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        execution_id = execution.id,
                        error = %e,
                        "Failed to label execution"
                    );
                    summary.errors += 1;
                }
            }
        }

        info!(
            total = summary.total_orders,
            labeled = summary.labeled_orders,
            written = summary.labels_written,
            errors = summary.errors,
            "Labeling pass completed"
        );
        summary
    }

    /// Write all derivable labels for one execution.
    async fn label_single_order(
        &self,
        execution: &ExecutedOrder,
    ) -> Result<usize, crate::persistence::PersistenceError> {
        let Some(planned) = self
            .store
            .get_planned_order(execution.planned_order_id)
            .await?
        else {
            debug!(
                execution_id = execution.id,
                "No planned order for execution, skipping"
            );
            return Ok(0);
        };

        let mut written = 0usize;
        let now = Utc::now();

        // Binary fill outcome: trivially 1.0 for anything executed
        self.store
            .upsert_label(&OrderLabel {
                planned_order_id: planned.id,
                kind: LabelKind::FilledBinary,
                value: 1.0,
                computed_at: now,
                notes: "Order was successfully filled".to_string(),
            })
            .await?;
        written += 1;

        // Time from plan creation to execution
        let time_to_fill = (execution.executed_at - planned.created_at).num_seconds();
        if time_to_fill >= 0 {
            self.store
                .upsert_label(&OrderLabel {
                    planned_order_id: planned.id,
                    kind: LabelKind::TimeToFill,
                    value: time_to_fill as f64,
                    computed_at: now,
                    notes: format!("Filled {time_to_fill}s after plan creation"),
                })
                .await?;
            written += 1;
        }

        // Side-adjusted slippage: negative is favorable for either side
        if let Some(slippage) = slippage(&planned, execution) {
            let direction = if slippage < 0.0 { "favorable" } else { "unfavorable" };
            self.store
                .upsert_label(&OrderLabel {
                    planned_order_id: planned.id,
                    kind: LabelKind::Slippage,
                    value: slippage,
                    computed_at: now,
                    notes: format!("Slippage {slippage:.4} ({direction})"),
                })
                .await?;
            written += 1;
        }

        // Profitability, once the position has closed
        if execution.closed_at.is_some()
            && let Some(pnl) = execution.pnl
        {
            let profitable = if pnl > rust_decimal::Decimal::ZERO { 1.0 } else { 0.0 };
            self.store
                .upsert_label(&OrderLabel {
                    planned_order_id: planned.id,
                    kind: LabelKind::Profitability,
                    value: profitable,
                    computed_at: now,
                    notes: format!("Closed with P&L {pnl}"),
                })
                .await?;
            written += 1;
        }

        // Probability accuracy against the latest pre-fill score
        if let Some(score) = self.store.latest_probability_score(planned.id).await? {
            let accurate = if score.fill_probability >= HIGH_CONFIDENCE_THRESHOLD {
                1.0
            } else {
                0.0
            };
            self.store
                .upsert_label(&OrderLabel {
                    planned_order_id: planned.id,
                    kind: LabelKind::ProbabilityAccuracy,
                    value: accurate,
                    computed_at: now,
                    notes: format!(
                        "Predicted {:.2} before a realized fill",
                        score.fill_probability
                    ),
                })
                .await?;
            written += 1;
        }

        Ok(written)
    }
}

/// Side-adjusted fill slippage: paying up as a buyer or selling down as a
/// seller is positive (unfavorable).
fn slippage(planned: &PlannedOrderRow, execution: &ExecutedOrder) -> Option<f64> {
    let entry = planned.order.entry_price?;
    let diff = match planned.order.action {
        Action::Buy => execution.filled_price - entry,
        Action::Sell | Action::ShortSell => entry - execution.filled_price,
    };
    diff.to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        OrderType, PlannedOrder, PositionStrategy, ProbabilityScore, SecurityType,
    };
    use rust_decimal_macros::dec;

    async fn seeded() -> (Arc<TradingStore>, i64, i64) {
        let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
        let order = PlannedOrder {
            security_type: SecurityType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            action: Action::Buy,
            symbol: "AAPL".to_string(),
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
        };
        let order_id = store.insert_planned_order(&order, false).await.unwrap();
        let exec_id = store
            .record_execution(
                order_id,
                PositionStrategy::Core,
                dec!(150.05),
                dec!(100),
                dec!(1),
                "FILLED",
                false,
                None,
            )
            .await
            .unwrap();
        (store, order_id, exec_id)
    }

    #[tokio::test]
    async fn test_labels_for_open_fill() {
        let (store, order_id, _) = seeded().await;
        let service = OutcomeLabelingService::new(Arc::clone(&store));

        let summary = service.label_completed_orders(24).await;
        assert_eq!(summary.total_orders, 1);
        assert_eq!(summary.labeled_orders, 1);
        assert_eq!(summary.errors, 0);

        let filled = store
            .get_label(order_id, LabelKind::FilledBinary)
            .await
            .unwrap()
            .unwrap();
        assert!((filled.value - 1.0).abs() < f64::EPSILON);

        // BUY filled 0.05 above entry: unfavorable positive slippage
        let slip = store
            .get_label(order_id, LabelKind::Slippage)
            .await
            .unwrap()
            .unwrap();
        assert!((slip.value - 0.05).abs() < 1e-9);

        // Not closed yet: no profitability label
        assert!(
            store
                .get_label(order_id, LabelKind::Profitability)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_relabeling_is_idempotent() {
        let (store, order_id, _) = seeded().await;
        let service = OutcomeLabelingService::new(Arc::clone(&store));

        service.label_completed_orders(24).await;
        let count_first = store.count_labels(order_id).await.unwrap();
        service.label_completed_orders(24).await;
        service.label_completed_orders(24).await;
        assert_eq!(store.count_labels(order_id).await.unwrap(), count_first);
    }

    #[tokio::test]
    async fn test_profitability_label_after_close() {
        let (store, order_id, exec_id) = seeded().await;
        store
            .close_execution(exec_id, dec!(750), Utc::now())
            .await
            .unwrap();

        let service = OutcomeLabelingService::new(Arc::clone(&store));
        service.label_completed_orders(24).await;

        let profit = store
            .get_label(order_id, LabelKind::Profitability)
            .await
            .unwrap()
            .unwrap();
        assert!((profit.value - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_probability_accuracy_label() {
        let (store, order_id, _) = seeded().await;
        store
            .record_probability_score(&ProbabilityScore {
                planned_order_id: order_id,
                timestamp: Utc::now(),
                fill_probability: 0.95,
                features: std::collections::BTreeMap::new(),
            })
            .await
            .unwrap();

        let service = OutcomeLabelingService::new(Arc::clone(&store));
        service.label_completed_orders(24).await;

        let accuracy = store
            .get_label(order_id, LabelKind::ProbabilityAccuracy)
            .await
            .unwrap()
            .unwrap();
        assert!((accuracy.value - 1.0).abs() < f64::EPSILON);
    }
}
