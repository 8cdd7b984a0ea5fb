//! Execution-record persistence and open-position queries.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use turso::{Row, Value};

use super::{
    PersistenceError, TradingStore, decimal_text, opt_text, parse_decimal, parse_timestamp,
    timestamp_text,
};
use crate::models::{ExecutedOrder, PositionStrategy};

const SELECT_COLUMNS: &str = "SELECT id, planned_order_id, filled_price, filled_quantity, \
     commission, pnl, status, executed_at, closed_at, is_open, is_live_trading, \
     account_number, expiration_date FROM executed_orders";

impl TradingStore {
    /// Record an execution row against a planned order.
    ///
    /// Live bracket submissions are recorded as SUBMITTED (not yet a
    /// position); simulated fills as FILLED. HYBRID fills are stamped with
    /// their ten-day expiration.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_execution(
        &self,
        planned_order_id: i64,
        strategy: PositionStrategy,
        filled_price: Decimal,
        filled_quantity: Decimal,
        commission: Decimal,
        status: &str,
        is_live_trading: bool,
        account_number: Option<&str>,
    ) -> Result<i64, PersistenceError> {
        let conn = self.connect()?;
        let now = Utc::now();
        let is_open = status == "FILLED";
        let expiration = match strategy {
            PositionStrategy::Hybrid => Some(now + Duration::days(10)),
            _ => None,
        };

        let params: Vec<Value> = vec![
            Value::Integer(planned_order_id),
            decimal_text(filled_price),
            decimal_text(filled_quantity),
            decimal_text(commission),
            Value::Text(status.to_string()),
            timestamp_text(now),
            Value::Integer(i64::from(is_open)),
            Value::Integer(i64::from(is_live_trading)),
            opt_text(account_number.map(ToString::to_string)),
            expiration.map_or(Value::Null, timestamp_text),
        ];

        conn.execute(
            "INSERT INTO executed_orders (
                planned_order_id, filled_price, filled_quantity, commission,
                status, executed_at, is_open, is_live_trading, account_number,
                expiration_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let id = self.last_insert_rowid(&conn).await?;
        debug!(
            planned_order_id,
            execution_id = id,
            status,
            "Execution recorded"
        );
        Ok(id)
    }

    /// Promote a SUBMITTED execution to FILLED (entry leg filled at broker).
    pub async fn mark_execution_filled(
        &self,
        execution_id: i64,
        filled_price: Decimal,
        commission: Decimal,
    ) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            decimal_text(filled_price),
            decimal_text(commission),
            Value::Integer(execution_id),
        ];
        let affected = conn
            .execute(
                "UPDATE executed_orders SET
                    status = 'FILLED', is_open = 1, filled_price = ?, commission = ?
                 WHERE id = ? AND status = 'SUBMITTED'",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        if affected == 0 {
            return Err(PersistenceError::NotFound(format!(
                "submitted execution {execution_id}"
            )));
        }
        Ok(())
    }

    /// Close an open position, writing its realized P&L.
    pub async fn close_execution(
        &self,
        execution_id: i64,
        pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![
            decimal_text(pnl),
            timestamp_text(closed_at),
            Value::Integer(execution_id),
        ];
        let affected = conn
            .execute(
                "UPDATE executed_orders SET
                    pnl = ?, is_open = 0, closed_at = ?, status = 'CLOSED'
                 WHERE id = ? AND is_open = 1",
                params,
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        if affected == 0 {
            return Err(PersistenceError::NotFound(format!(
                "open execution {execution_id}"
            )));
        }
        Ok(())
    }

    /// Fetch an execution row by id.
    pub async fn get_execution(
        &self,
        execution_id: i64,
    ) -> Result<Option<ExecutedOrder>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![Value::Integer(execution_id)];
        let mut rows = conn
            .query(&format!("{SELECT_COLUMNS} WHERE id = ?"), params)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_execution(&row)?)),
            None => Ok(None),
        }
    }

    /// All open positions, optionally filtered by symbol.
    pub async fn open_positions(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExecutedOrder>, PersistenceError> {
        let conn = self.connect()?;
        let (sql, params): (String, Vec<Value>) = match symbol {
            Some(symbol) => (
                format!(
                    "{SELECT_COLUMNS} WHERE is_open = 1 AND planned_order_id IN
                        (SELECT id FROM planned_orders WHERE symbol = ?)"
                ),
                vec![Value::Text(symbol.to_string())],
            ),
            None => (format!("{SELECT_COLUMNS} WHERE is_open = 1"), vec![]),
        };

        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?
        {
            result.push(row_to_execution(&row)?);
        }
        Ok(result)
    }

    /// Recently filled executions (labeling input).
    pub async fn filled_executions_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExecutedOrder>, PersistenceError> {
        let conn = self.connect()?;
        let params: Vec<Value> = vec![timestamp_text(cutoff)];
        let mut rows = conn
            .query(
                &format!(
                    "{SELECT_COLUMNS} WHERE executed_at >= ?
                     AND status IN ('FILLED', 'CLOSED') ORDER BY id"
                ),
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
            result.push(row_to_execution(&row)?);
        }
        Ok(result)
    }
}

fn row_to_execution(row: &Row) -> Result<ExecutedOrder, PersistenceError> {
    let text = |index: usize, name: &str| -> Result<String, PersistenceError> {
        row.get::<String>(index)
            .map_err(|e| PersistenceError::MissingField(format!("{name}: {e}")))
    };

    let executed_at = parse_timestamp(&text(7, "executed_at")?)
        .ok_or_else(|| PersistenceError::MissingField("executed_at".to_string()))?;

    Ok(ExecutedOrder {
        id: row
            .get(0)
            .map_err(|e| PersistenceError::MissingField(format!("id: {e}")))?,
        planned_order_id: row
            .get(1)
            .map_err(|e| PersistenceError::MissingField(format!("planned_order_id: {e}")))?,
        filled_price: parse_decimal(&text(2, "filled_price")?),
        filled_quantity: parse_decimal(&text(3, "filled_quantity")?),
        commission: parse_decimal(&text(4, "commission")?),
        pnl: row.get::<String>(5).ok().map(|p| parse_decimal(&p)),
        status: text(6, "status")?,
        executed_at,
        closed_at: row.get::<String>(8).ok().and_then(|t| parse_timestamp(&t)),
        is_open: row.get::<i64>(9).unwrap_or(0) != 0,
        is_live_trading: row.get::<i64>(10).unwrap_or(0) != 0,
        account_number: row.get::<String>(11).ok(),
        expiration_date: row.get::<String>(12).ok().and_then(|t| parse_timestamp(&t)),
    })
}
