//! Labels, probability scores, attempts, realized P&L, and margin checks.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use turso::Value;

use super::{
    PersistenceError, TradingStore, decimal_text, opt_text, parse_decimal, parse_timestamp,
    timestamp_text,
};
use crate::models::{LabelKind, OrderLabel, ProbabilityScore, SecurityType};

/// Margin fraction required for forex notional.
const CASH_MARGIN_RATE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

/// Margin fraction required for everything else.
const DEFAULT_MARGIN_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Fraction of equity that margin may consume.
const MAX_MARGIN_UTILIZATION: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

impl TradingStore {
    // ========================================================================
    // Outcome labels
    // ========================================================================

    /// Upsert a label; (planned_order_id, label_type) is unique so
    /// relabeling is idempotent.
    pub async fn upsert_label(&self, label: &OrderLabel) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            Value::Integer(label.planned_order_id),
            Value::Text(label.kind.as_str().to_string()),
            Value::Real(label.value),
            timestamp_text(label.computed_at),
            Value::Text(label.notes.clone()),
        ];
        conn.execute(
            "INSERT OR REPLACE INTO order_labels (
                planned_order_id, label_type, label_value, computed_at, notes
            ) VALUES (?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    /// Number of labels attached to a planned order.
    pub async fn count_labels(&self, planned_order_id: i64) -> Result<usize, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![Value::Integer(planned_order_id)];
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM order_labels WHERE planned_order_id = ?",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        let count = match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => row.get::<i64>(0).unwrap_or(0),
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Fetch one label by order and kind.
    pub async fn get_label(
        &self,
        planned_order_id: i64,
        kind: LabelKind,
    ) -> Result<Option<OrderLabel>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            Value::Integer(planned_order_id),
            Value::Text(kind.as_str().to_string()),
        ];
        let mut rows = conn
            .query(
                "SELECT label_value, computed_at, notes FROM order_labels
                 WHERE planned_order_id = ? AND label_type = ?",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => {
                let computed_at = row
                    .get::<String>(1)
                    .ok()
                    .and_then(|t| parse_timestamp(&t))
                    .unwrap_or_else(Utc::now);
                Ok(Some(OrderLabel {
                    planned_order_id,
                    kind,
                    value: row.get::<f64>(0).unwrap_or(0.0),
                    computed_at,
                    notes: row.get::<String>(2).unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Probability scores and attempts
    // ========================================================================

    /// Append a probability evaluation with its feature map.
    pub async fn record_probability_score(
        &self,
        score: &ProbabilityScore,
    ) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let features = serde_json::to_string(&score.features)?;
        let params: Vec<Value> = vec![
            Value::Integer(score.planned_order_id),
            timestamp_text(score.timestamp),
            Value::Real(score.fill_probability),
            Value::Text(features),
        ];
        conn.execute(
            "INSERT INTO probability_scores (
                planned_order_id, timestamp, fill_probability, features
            ) VALUES (?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    /// Most recent probability score for an order.
    pub async fn latest_probability_score(
        &self,
        planned_order_id: i64,
    ) -> Result<Option<ProbabilityScore>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![Value::Integer(planned_order_id)];
        let mut rows = conn
            .query(
                "SELECT timestamp, fill_probability, features FROM probability_scores
                 WHERE planned_order_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => {
                let timestamp = row
                    .get::<String>(0)
                    .ok()
                    .and_then(|t| parse_timestamp(&t))
                    .unwrap_or_else(Utc::now);
                let features = row
                    .get::<String>(2)
                    .ok()
                    .and_then(|text| serde_json::from_str(&text).ok())
                    .unwrap_or_default();
                Ok(Some(ProbabilityScore {
                    planned_order_id,
                    timestamp,
                    fill_probability: row.get::<f64>(1).unwrap_or(0.0),
                    features,
                }))
            }
            None => Ok(None),
        }
    }

    /// Append an evaluation attempt to the audit trail.
    pub async fn record_attempt(
        &self,
        planned_order_id: i64,
        attempt_type: &str,
        fill_probability: Option<f64>,
        account_number: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            Value::Integer(planned_order_id),
            timestamp_text(Utc::now()),
            Value::Text(attempt_type.to_string()),
            fill_probability.map_or(Value::Null, Value::Real),
            opt_text(account_number.map(ToString::to_string)),
        ];
        conn.execute(
            "INSERT INTO order_attempts (
                planned_order_id, attempt_ts, attempt_type, fill_probability,
                account_number
            ) VALUES (?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    // ========================================================================
    // Realized P&L
    // ========================================================================

    /// Record realized P&L for a closed trade.
    pub async fn record_realized_pnl(
        &self,
        order_id: i64,
        symbol: &str,
        pnl: Decimal,
        exit_date: DateTime<Utc>,
        account_number: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            Value::Integer(order_id),
            Value::Text(symbol.to_string()),
            decimal_text(pnl),
            timestamp_text(exit_date),
            opt_text(account_number.map(ToString::to_string)),
        ];
        conn.execute(
            "INSERT INTO realized_pnl (
                order_id, symbol, pnl, exit_date, account_number
            ) VALUES (?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;
        debug!(symbol, %pnl, "Realized P&L recorded");
        Ok(())
    }

    /// Sum of realized P&L over the trailing window, scoped by account.
    pub async fn realized_pnl_window(
        &self,
        days: i64,
        account_number: Option<&str>,
    ) -> Result<Decimal, PersistenceError> {
        let conn = self.connect()?;
        let cutoff = Utc::now() - Duration::days(days);

        let (sql, params): (&str, Vec<Value>) = match account_number {
            Some(account) => (
                "SELECT pnl FROM realized_pnl WHERE exit_date >= ? AND account_number = ?",
                vec![timestamp_text(cutoff), Value::Text(account.to_string())],
            ),
            None => (
                "SELECT pnl FROM realized_pnl WHERE exit_date >= ?",
                vec![timestamp_text(cutoff)],
            ),
        };

        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut total = Decimal::ZERO;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            if let Ok(text) = row.get::<String>(0) {
                total += parse_decimal(&text);
            }
        }
        Ok(total)
    }

    /// Realized P&L values of closed trades for a named setup within the
    /// lookback window. Feeds the setup-bias score.
    pub async fn setup_trade_pnls(
        &self,
        setup_name: &str,
        days_back: i64,
    ) -> Result<Vec<Decimal>, PersistenceError> {
        let conn = self.connect()?;
        let cutoff = Utc::now() - Duration::days(days_back);
        let params: Vec<Value> = vec![
            Value::Text(setup_name.to_string()),
            timestamp_text(cutoff),
        ];

        let mut rows = conn
            .query(
                "SELECT pnl FROM executed_orders
                 WHERE planned_order_id IN
                       (SELECT id FROM planned_orders WHERE trading_setup = ?)
                   AND closed_at >= ? AND pnl IS NOT NULL",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut pnls = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            if let Ok(text) = row.get::<String>(0) {
                pnls.push(parse_decimal(&text));
            }
        }
        Ok(pnls)
    }

    // ========================================================================
    // Margin
    // ========================================================================

    /// Check that the account can carry the proposed trade's margin.
    ///
    /// Forex requires 2% of notional, everything else 50%; margin may not
    /// consume more than 80% of equity.
    #[must_use]
    pub fn validate_sufficient_margin(
        &self,
        security_type: SecurityType,
        quantity: Decimal,
        entry_price: Decimal,
        equity: Decimal,
    ) -> (bool, String) {
        let notional = quantity * entry_price;
        let rate = match security_type {
            SecurityType::Cash => CASH_MARGIN_RATE,
            _ => DEFAULT_MARGIN_RATE,
        };
        let required = notional * rate;
        let available = equity * MAX_MARGIN_UTILIZATION;

        if required > available {
            (
                false,
                format!(
                    "Insufficient margin. Required: {required}, Available: {available}, Equity: {equity}"
                ),
            )
        } else {
            (true, "Sufficient margin available".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, OrderType, PlannedOrder, PositionStrategy};
    use rust_decimal_macros::dec;

    async fn seeded_store() -> (TradingStore, i64) {
        let store = TradingStore::new_in_memory().await.unwrap();
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
            trading_setup: Some("Breakout".to_string()),
            core_timeframe: None,
            overall_trend: None,
            brief_analysis: None,
            expiration_date: None,
        };
        let id = store.insert_planned_order(&order, false).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_label_upsert_is_idempotent() {
        let (store, order_id) = seeded_store().await;
        let label = OrderLabel {
            planned_order_id: order_id,
            kind: LabelKind::FilledBinary,
            value: 1.0,
            computed_at: Utc::now(),
            notes: "Order was successfully filled".to_string(),
        };

        store.upsert_label(&label).await.unwrap();
        store.upsert_label(&label).await.unwrap();
        store.upsert_label(&label).await.unwrap();

        assert_eq!(store.count_labels(order_id).await.unwrap(), 1);
        let stored = store
            .get_label(order_id, LabelKind::FilledBinary)
            .await
            .unwrap()
            .unwrap();
        assert!((stored.value - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_latest_probability_score_wins() {
        let (store, order_id) = seeded_store().await;
        for (offset, prob) in [(60, 0.2), (30, 0.5), (0, 0.9)] {
            let score = ProbabilityScore {
                planned_order_id: order_id,
                timestamp: Utc::now() - Duration::seconds(offset),
                fill_probability: prob,
                features: std::collections::BTreeMap::new(),
            };
            store.record_probability_score(&score).await.unwrap();
        }

        let latest = store
            .latest_probability_score(order_id)
            .await
            .unwrap()
            .unwrap();
        assert!((latest.fill_probability - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_realized_pnl_window_scoping() {
        let (store, order_id) = seeded_store().await;
        store
            .record_realized_pnl(order_id, "AAPL", dec!(-2100), Utc::now(), Some("DU1"))
            .await
            .unwrap();
        store
            .record_realized_pnl(order_id, "AAPL", dec!(500), Utc::now(), Some("DU2"))
            .await
            .unwrap();
        // Outside the 1-day window
        store
            .record_realized_pnl(
                order_id,
                "AAPL",
                dec!(-9999),
                Utc::now() - Duration::days(3),
                Some("DU1"),
            )
            .await
            .unwrap();

        assert_eq!(
            store.realized_pnl_window(1, Some("DU1")).await.unwrap(),
            dec!(-2100)
        );
        assert_eq!(
            store.realized_pnl_window(1, None).await.unwrap(),
            dec!(-1600)
        );
        assert_eq!(
            store.realized_pnl_window(7, Some("DU1")).await.unwrap(),
            dec!(-12099)
        );
    }

    #[tokio::test]
    async fn test_margin_validation() {
        let store = TradingStore::new_in_memory().await.unwrap();
        // Equities: 50% margin. 100 @ 150 = 15000 notional -> 7500 required,
        // 80000 available on 100k equity.
        let (ok, _) = store.validate_sufficient_margin(
            SecurityType::Stk,
            dec!(100),
            dec!(150),
            dec!(100000),
        );
        assert!(ok);

        // 2000 @ 150 = 300k notional -> 150k required > 80k available
        let (ok, message) = store.validate_sufficient_margin(
            SecurityType::Stk,
            dec!(2000),
            dec!(150),
            dec!(100000),
        );
        assert!(!ok);
        assert!(message.contains("Insufficient margin"));

        // Forex: 2% margin makes the same notional fine
        let (ok, _) = store.validate_sufficient_margin(
            SecurityType::Cash,
            dec!(2000),
            dec!(150),
            dec!(100000),
        );
        assert!(ok);
    }

    #[tokio::test]
    async fn test_setup_trade_pnls() {
        let (store, order_id) = seeded_store().await;
        let exec_id = store
            .record_execution(
                order_id,
                PositionStrategy::Core,
                dec!(150),
                dec!(100),
                dec!(0),
                "FILLED",
                false,
                None,
            )
            .await
            .unwrap();
        store
            .close_execution(exec_id, dec!(420), Utc::now())
            .await
            .unwrap();

        let pnls = store.setup_trade_pnls("Breakout", 90).await.unwrap();
        assert_eq!(pnls, vec![dec!(420)]);
        assert!(store.setup_trade_pnls("Reversal", 90).await.unwrap().is_empty());
    }
}
