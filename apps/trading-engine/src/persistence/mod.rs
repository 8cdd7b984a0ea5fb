//! Durable store for planned orders, executions, labels, scores, and P&L.
//!
//! Uses Turso (Rust rewrite of `SQLite`) for local durable storage. One
//! `TradingStore` owns the database; every mutation commits, and failures
//! surface as `PersistenceError` with the mutation not applied.
//!
//! Decimals are stored as TEXT to avoid float drift; timestamps are RFC 3339
//! TEXT.

mod analytics;
mod executions;
mod planned_orders;

pub use planned_orders::PlannedOrderRow;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use turso::{Builder, Connection, Database, Error as TursoError, Value};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Query error: {0}")]
    Query(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Missing required field.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Row not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<TursoError> for PersistenceError {
    fn from(err: TursoError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Durable store for all trading state.
pub struct TradingStore {
    /// Database handle.
    db: Database,
}

impl TradingStore {
    /// Open (and migrate) a local database file.
    pub async fn new_local(db_path: &str) -> Result<Self, PersistenceError> {
        let db = Builder::new_local(db_path).build().await?;
        Self::run_migrations(&db).await?;
        Ok(Self { db })
    }

    /// Open an in-memory database (tests, dry runs).
    pub async fn new_in_memory() -> Result<Self, PersistenceError> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::run_migrations(&db).await?;
        Ok(Self { db })
    }

    pub(crate) fn connect(&self) -> Result<Connection, PersistenceError> {
        Ok(self.db.connect()?)
    }

    /// Create tables and seed lookup rows.
    async fn run_migrations(db: &Database) -> Result<(), PersistenceError> {
        let conn = db.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS position_strategies (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            INSERT OR IGNORE INTO position_strategies (id, name) VALUES
                (1, 'DAY'), (2, 'CORE'), (3, 'HYBRID');

            CREATE TABLE IF NOT EXISTS planned_orders (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                security_type TEXT NOT NULL,
                action TEXT NOT NULL,
                order_type TEXT NOT NULL,
                exchange TEXT NOT NULL DEFAULT 'SMART',
                currency TEXT NOT NULL DEFAULT 'USD',
                entry_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                risk_per_trade TEXT NOT NULL,
                risk_reward_ratio TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 3,
                position_strategy_id INTEGER NOT NULL
                    REFERENCES position_strategies(id),
                trading_setup TEXT,
                core_timeframe TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                status_reason TEXT,
                is_live_trading INTEGER NOT NULL DEFAULT 0,
                broker_order_ids TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_planned_orders_status
                ON planned_orders(status);

            CREATE INDEX IF NOT EXISTS idx_planned_orders_key
                ON planned_orders(symbol, action, entry_price, stop_loss);

            CREATE TABLE IF NOT EXISTS executed_orders (
                id INTEGER PRIMARY KEY,
                planned_order_id INTEGER NOT NULL
                    REFERENCES planned_orders(id),
                filled_price TEXT NOT NULL,
                filled_quantity TEXT NOT NULL,
                commission TEXT NOT NULL DEFAULT '0',
                pnl TEXT,
                status TEXT NOT NULL DEFAULT 'FILLED',
                executed_at TEXT NOT NULL,
                closed_at TEXT,
                is_open INTEGER NOT NULL DEFAULT 0,
                is_live_trading INTEGER NOT NULL DEFAULT 0,
                account_number TEXT,
                expiration_date TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_executed_orders_open
                ON executed_orders(is_open);

            CREATE TABLE IF NOT EXISTS order_labels (
                planned_order_id INTEGER NOT NULL
                    REFERENCES planned_orders(id),
                label_type TEXT NOT NULL,
                label_value REAL NOT NULL,
                computed_at TEXT NOT NULL,
                notes TEXT,
                PRIMARY KEY (planned_order_id, label_type)
            );

            CREATE TABLE IF NOT EXISTS probability_scores (
                id INTEGER PRIMARY KEY,
                planned_order_id INTEGER NOT NULL
                    REFERENCES planned_orders(id),
                timestamp TEXT NOT NULL,
                fill_probability REAL NOT NULL,
                features TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_probability_scores_order
                ON probability_scores(planned_order_id, timestamp);

            CREATE TABLE IF NOT EXISTS order_attempts (
                id INTEGER PRIMARY KEY,
                planned_order_id INTEGER NOT NULL
                    REFERENCES planned_orders(id),
                attempt_ts TEXT NOT NULL,
                attempt_type TEXT NOT NULL,
                fill_probability REAL,
                account_number TEXT
            );

            CREATE TABLE IF NOT EXISTS realized_pnl (
                id INTEGER PRIMARY KEY,
                order_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                pnl TEXT NOT NULL,
                exit_date TEXT NOT NULL,
                account_number TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_realized_pnl_exit
                ON realized_pnl(exit_date);",
        )
        .await
        .map_err(|e| PersistenceError::Query(e.to_string()))?;

        info!("Trading store migrations complete");
        Ok(())
    }
}

// ============================================================================
// Row helpers
// ============================================================================

pub(crate) fn decimal_text(value: Decimal) -> Value {
    Value::Text(value.to_string())
}

pub(crate) fn opt_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

pub(crate) fn timestamp_text(value: DateTime<Utc>) -> Value {
    Value::Text(value.to_rfc3339())
}

pub(crate) fn parse_decimal(text: &str) -> Decimal {
    text.parse().unwrap_or(Decimal::ZERO)
}

pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
