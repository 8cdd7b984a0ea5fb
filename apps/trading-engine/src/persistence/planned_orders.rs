//! Planned-order persistence.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use turso::{Row, Value};

use super::{
    PersistenceError, TradingStore, decimal_text, opt_text, parse_decimal, parse_timestamp,
    timestamp_text,
};
use crate::models::{
    Action, OrderKey, OrderState, OrderType, PlannedOrder, PositionStrategy, SecurityType,
};

const SELECT_COLUMNS: &str = "SELECT id, symbol, security_type, action, \
     order_type, exchange, currency, entry_price, stop_loss, \
     risk_per_trade, risk_reward_ratio, priority, position_strategy_id, \
     trading_setup, core_timeframe, status, status_reason, \
     is_live_trading, broker_order_ids, created_at, updated_at \
     FROM planned_orders";

/// Seeded lookup ids for position strategies.
const fn strategy_id(strategy: PositionStrategy) -> i64 {
    match strategy {
        PositionStrategy::Day => 1,
        PositionStrategy::Core => 2,
        PositionStrategy::Hybrid => 3,
    }
}

fn strategy_from_id(id: i64) -> Option<PositionStrategy> {
    match id {
        1 => Some(PositionStrategy::Day),
        2 => Some(PositionStrategy::Core),
        3 => Some(PositionStrategy::Hybrid),
        _ => None,
    }
}

/// A planned order as stored, with its lifecycle metadata.
#[derive(Debug, Clone)]
pub struct PlannedOrderRow {
    /// Database row id.
    pub id: i64,
    /// The domain order.
    pub order: PlannedOrder,
    /// Lifecycle status.
    pub status: OrderState,
    /// Reason attached to the last status change.
    pub status_reason: Option<String>,
    /// Whether the order belongs to a live account.
    pub is_live_trading: bool,
    /// Broker order ids of the submitted bracket.
    pub broker_order_ids: Vec<i64>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl TradingStore {
    /// Insert a planned order in PENDING state. Returns the new row id.
    pub async fn insert_planned_order(
        &self,
        order: &PlannedOrder,
        is_live_trading: bool,
    ) -> Result<i64, PersistenceError> {
        let conn = self.connect()?;
        let now = Utc::now();

        let entry = order
            .entry_price
            .ok_or_else(|| PersistenceError::MissingField("entry_price".to_string()))?;
        let stop = order
            .stop_loss
            .ok_or_else(|| PersistenceError::MissingField("stop_loss".to_string()))?;

        let params: Vec<Value> = vec![
            Value::Text(order.symbol.clone()),
            Value::Text(order.security_type.as_str().to_string()),
            Value::Text(order.action.as_str().to_string()),
            Value::Text(order.order_type.as_str().to_string()),
            Value::Text(order.exchange.clone()),
            Value::Text(order.currency.clone()),
            decimal_text(entry.normalize()),
            decimal_text(stop.normalize()),
            decimal_text(order.risk_per_trade),
            decimal_text(order.risk_reward_ratio),
            Value::Integer(i64::from(order.priority)),
            Value::Integer(strategy_id(order.position_strategy)),
            opt_text(order.trading_setup.clone()),
            opt_text(order.core_timeframe.clone()),
            Value::Integer(i64::from(is_live_trading)),
            timestamp_text(now),
            timestamp_text(now),
        ];

        conn.execute(
            "INSERT INTO planned_orders (
                symbol, security_type, action, order_type, exchange, currency,
                entry_price, stop_loss, risk_per_trade, risk_reward_ratio,
                priority, position_strategy_id, trading_setup, core_timeframe,
                is_live_trading, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let id = self.last_insert_rowid(&conn).await?;
        debug!(symbol = %order.symbol, id, "Planned order persisted");
        Ok(id)
    }

    /// Find a planned order by natural key, returning its id.
    pub async fn find_planned_order_id(
        &self,
        key: &OrderKey,
    ) -> Result<Option<i64>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            Value::Text(key.symbol.clone()),
            Value::Text(key.action.as_str().to_string()),
            decimal_text(key.entry_price),
            decimal_text(key.stop_loss),
        ];

        let mut rows = conn
            .query(
                "SELECT id FROM planned_orders
                 WHERE symbol = ? AND action = ? AND entry_price = ? AND stop_loss = ?
                 ORDER BY id DESC LIMIT 1",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(|e| {
                PersistenceError::MissingField(format!("id: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Find an order by (symbol, action, entry) only. Used by broker-order
    /// discovery, where the stop leg may not be recoverable.
    pub async fn find_by_symbol_action_entry(
        &self,
        symbol: &str,
        action: Action,
        entry_price: Decimal,
    ) -> Result<Option<i64>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            Value::Text(symbol.to_string()),
            Value::Text(action.as_str().to_string()),
            decimal_text(entry_price.normalize()),
        ];

        let mut rows = conn
            .query(
                "SELECT id FROM planned_orders
                 WHERE symbol = ? AND action = ? AND entry_price = ?
                 ORDER BY id DESC LIMIT 1",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(|e| {
                PersistenceError::MissingField(format!("id: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Insert the order unless its natural key already exists. Returns the
    /// row id either way, plus whether an insert happened.
    pub async fn ensure_planned_order(
        &self,
        order: &PlannedOrder,
        is_live_trading: bool,
    ) -> Result<(i64, bool), PersistenceError> {
        let key = order
            .key()
            .map_err(|e| PersistenceError::MissingField(e.to_string()))?;
        if let Some(id) = self.find_planned_order_id(&key).await? {
            return Ok((id, false));
        }
        let id = self.insert_planned_order(order, is_live_trading).await?;
        Ok((id, true))
    }

    /// Fetch a planned-order row by id.
    pub async fn get_planned_order(
        &self,
        id: i64,
    ) -> Result<Option<PlannedOrderRow>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![Value::Integer(id)];
        let mut rows = conn
            .query(&format!("{SELECT_COLUMNS} WHERE id = ?"), params)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_planned_order(&row)?)),
            None => Ok(None),
        }
    }

    /// Load all planned orders currently in one of the given states.
    pub async fn load_orders_by_states(
        &self,
        states: &[OrderState],
    ) -> Result<Vec<PlannedOrderRow>, PersistenceError> {
        if states.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.connect()?;
        let placeholders = vec!["?"; states.len()].join(", ");
        let params: Vec<Value> = states
            .iter()
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();

        let mut rows = conn
            .query(
                &format!("{SELECT_COLUMNS} WHERE status IN ({placeholders}) ORDER BY id"),
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            result.push(row_to_planned_order(&row)?);
        }
        Ok(result)
    }

    /// Current status of a planned order.
    pub async fn get_order_status(&self, id: i64) -> Result<Option<OrderState>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![Value::Integer(id)];
        let mut rows = conn
            .query("SELECT status FROM planned_orders WHERE id = ?", params)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => {
                let text: String = row
                    .get(0)
                    .map_err(|e| PersistenceError::MissingField(format!("status: {e}")))?;
                Ok(OrderState::parse(&text).ok())
            }
            None => Ok(None),
        }
    }

    /// Update the status (and optional reason / broker ids) of an order.
    pub async fn update_order_status(
        &self,
        id: i64,
        status: OrderState,
        reason: Option<&str>,
        broker_order_ids: Option<&[i64]>,
    ) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let ids_json = match broker_order_ids {
            Some(ids) => Some(serde_json::to_string(ids)?),
            None => None,
        };

        let params: Vec<Value> = vec![
            Value::Text(status.as_str().to_string()),
            reason.map_or(Value::Null, |r| {
                // status_reason column is bounded
                Value::Text(r.chars().take(255).collect())
            }),
            ids_json.map_or(Value::Null, Value::Text),
            timestamp_text(Utc::now()),
            Value::Integer(id),
        ];

        let affected = conn
            .execute(
                "UPDATE planned_orders SET
                    status = ?,
                    status_reason = COALESCE(?, status_reason),
                    broker_order_ids = COALESCE(?, broker_order_ids),
                    updated_at = ?
                 WHERE id = ?",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        if affected == 0 {
            return Err(PersistenceError::NotFound(format!("planned order {id}")));
        }
        debug!(id, status = %status, "Order status updated");
        Ok(())
    }

    pub(crate) async fn last_insert_rowid(
        &self,
        conn: &turso::Connection,
    ) -> Result<i64, PersistenceError> {
        let mut rows = conn
            .query("SELECT last_insert_rowid()", Vec::<Value>::new())
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
            .ok_or_else(|| PersistenceError::Query("last_insert_rowid empty".to_string()))?;
        row.get::<i64>(0)
            .map_err(|e| PersistenceError::MissingField(format!("rowid: {e}")))
    }
}

fn row_to_planned_order(row: &Row) -> Result<PlannedOrderRow, PersistenceError> {
    let field = |index: usize, name: &str| -> Result<String, PersistenceError> {
        row.get::<String>(index)
            .map_err(|e| PersistenceError::MissingField(format!("{name}: {e}")))
    };

    let id: i64 = row
        .get(0)
        .map_err(|e| PersistenceError::MissingField(format!("id: {e}")))?;

    let security_type = SecurityType::parse(&field(2, "security_type")?)
        .map_err(|e| PersistenceError::MissingField(e.to_string()))?;
    let action = Action::parse(&field(3, "action")?)
        .map_err(|e| PersistenceError::MissingField(e.to_string()))?;
    let order_type = OrderType::parse(&field(4, "order_type")?)
        .map_err(|e| PersistenceError::MissingField(e.to_string()))?;
    let position_strategy = strategy_from_id(row.get::<i64>(12).unwrap_or(0))
        .ok_or_else(|| PersistenceError::MissingField("position_strategy_id".to_string()))?;
    let status = OrderState::parse(&field(15, "status")?)
        .map_err(|e| PersistenceError::MissingField(e.to_string()))?;

    let created_at = parse_timestamp(&field(19, "created_at")?)
        .ok_or_else(|| PersistenceError::MissingField("created_at".to_string()))?;
    let updated_at = parse_timestamp(&field(20, "updated_at")?).unwrap_or(created_at);

    let broker_order_ids: Vec<i64> = row
        .get::<String>(18)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();

    let order = PlannedOrder {
        security_type,
        exchange: field(5, "exchange")?,
        currency: field(6, "currency")?,
        action,
        symbol: field(1, "symbol")?,
        order_type,
        risk_per_trade: parse_decimal(&field(9, "risk_per_trade")?),
        entry_price: Some(parse_decimal(&field(7, "entry_price")?)),
        stop_loss: Some(parse_decimal(&field(8, "stop_loss")?)),
        risk_reward_ratio: parse_decimal(&field(10, "risk_reward_ratio")?),
        position_strategy,
        priority: u8::try_from(row.get::<i64>(11).unwrap_or(3)).unwrap_or(3),
        trading_setup: row.get::<String>(13).ok(),
        core_timeframe: row.get::<String>(14).ok(),
        overall_trend: None,
        brief_analysis: None,
        expiration_date: None,
    };

    Ok(PlannedOrderRow {
        id,
        order,
        status,
        status_reason: row.get::<String>(16).ok(),
        is_live_trading: row.get::<i64>(17).unwrap_or(0) != 0,
        broker_order_ids,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(symbol: &str, entry: Decimal, stop: Decimal) -> PlannedOrder {
        PlannedOrder {
            security_type: SecurityType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            action: Action::Buy,
            symbol: symbol.to_string(),
            order_type: OrderType::Limit,
            risk_per_trade: dec!(0.005),
            entry_price: Some(entry),
            stop_loss: Some(stop),
            risk_reward_ratio: dec!(2.0),
            position_strategy: PositionStrategy::Core,
            priority: 3,
            trading_setup: Some("Breakout".to_string()),
            core_timeframe: Some("1H".to_string()),
            overall_trend: None,
            brief_analysis: None,
            expiration_date: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_roundtrip() {
        let store = TradingStore::new_in_memory().await.unwrap();
        let order = make_order("AAPL", dec!(150), dec!(145));

        let id = store.insert_planned_order(&order, false).await.unwrap();
        let row = store.get_planned_order(id).await.unwrap().unwrap();

        assert_eq!(row.order.symbol, "AAPL");
        assert_eq!(row.order.entry_price, Some(dec!(150)));
        assert_eq!(row.order.stop_loss, Some(dec!(145)));
        assert_eq!(row.order.position_strategy, PositionStrategy::Core);
        assert_eq!(row.order.trading_setup.as_deref(), Some("Breakout"));
        assert_eq!(row.status, OrderState::Pending);
        assert!(!row.is_live_trading);
    }

    #[tokio::test]
    async fn test_find_by_natural_key() {
        let store = TradingStore::new_in_memory().await.unwrap();
        let order = make_order("MSFT", dec!(300), dec!(295));
        let id = store.insert_planned_order(&order, false).await.unwrap();

        let found = store
            .find_planned_order_id(&order.key().unwrap())
            .await
            .unwrap();
        assert_eq!(found, Some(id));

        let other = make_order("MSFT", dec!(301), dec!(295));
        assert!(
            store
                .find_planned_order_id(&other.key().unwrap())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_ensure_deduplicates() {
        let store = TradingStore::new_in_memory().await.unwrap();
        let order = make_order("TSLA", dec!(250), dec!(245));

        let (first_id, inserted) = store.ensure_planned_order(&order, false).await.unwrap();
        assert!(inserted);
        let (second_id, inserted_again) = store.ensure_planned_order(&order, false).await.unwrap();
        assert!(!inserted_again);
        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn test_status_update_with_reason_and_ids() {
        let store = TradingStore::new_in_memory().await.unwrap();
        let order = make_order("NVDA", dec!(500), dec!(490));
        let id = store.insert_planned_order(&order, true).await.unwrap();

        store
            .update_order_status(id, OrderState::Live, Some("bracket placed"), Some(&[7, 8, 9]))
            .await
            .unwrap();

        let row = store.get_planned_order(id).await.unwrap().unwrap();
        assert_eq!(row.status, OrderState::Live);
        assert_eq!(row.status_reason.as_deref(), Some("bracket placed"));
        assert_eq!(row.broker_order_ids, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_update_missing_order_fails() {
        let store = TradingStore::new_in_memory().await.unwrap();
        let result = store
            .update_order_status(999, OrderState::Live, None, None)
            .await;
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_by_states_filters() {
        let store = TradingStore::new_in_memory().await.unwrap();
        let a = store
            .insert_planned_order(&make_order("A", dec!(10), dec!(9)), false)
            .await
            .unwrap();
        let b = store
            .insert_planned_order(&make_order("B", dec!(20), dec!(19)), false)
            .await
            .unwrap();
        store
            .update_order_status(b, OrderState::Cancelled, None, None)
            .await
            .unwrap();

        let working = store
            .load_orders_by_states(&[OrderState::Pending, OrderState::Live])
            .await
            .unwrap();
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].id, a);
    }
}
