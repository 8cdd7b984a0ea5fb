//! Plan-sheet source contract and row validation.
//!
//! The sheet parser itself is an external collaborator: anything able to
//! produce `PlanRow`s can feed the loader. Row-to-order conversion applies
//! configured defaults and enforces the domain invariants; unknown enum
//! values abort the row.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::OrderDefaultsConfig;
use crate::models::{
    Action, OrderType, PlannedOrder, PositionStrategy, SecurityType, ValidationError,
};

/// Failures while fetching plan rows.
#[derive(Debug, Error)]
pub enum PlanSourceError {
    /// The backing file or resource could not be read.
    #[error("Plan source unavailable: {0}")]
    Unavailable(String),

    /// The resource was read but could not be parsed into rows.
    #[error("Plan source malformed: {0}")]
    Malformed(String),
}

/// One row of the trading plan, as raw cells.
#[derive(Debug, Clone, Default)]
pub struct PlanRow {
    /// Security Type column (required).
    pub security_type: String,
    /// Exchange column (required).
    pub exchange: String,
    /// Currency column (required).
    pub currency: String,
    /// Action column (required).
    pub action: String,
    /// Symbol column (required).
    pub symbol: String,
    /// Order Type column.
    pub order_type: Option<String>,
    /// Entry Price column.
    pub entry_price: Option<Decimal>,
    /// Stop Loss column.
    pub stop_loss: Option<Decimal>,
    /// Risk Per Trade column.
    pub risk_per_trade: Option<Decimal>,
    /// Risk Reward Ratio column.
    pub risk_reward_ratio: Option<Decimal>,
    /// Position Management Strategy column.
    pub position_strategy: Option<String>,
    /// Priority column.
    pub priority: Option<u8>,
    /// Trading Setup column.
    pub trading_setup: Option<String>,
    /// Core Timeframe column.
    pub core_timeframe: Option<String>,
    /// Overall Trend column.
    pub overall_trend: Option<String>,
    /// Brief Analysis column.
    pub brief_analysis: Option<String>,
}

/// Supplier of plan rows (sheet parser adapter).
pub trait PlanSource: Send + Sync {
    /// Fetch all rows of the current plan.
    fn fetch_rows(&self) -> Result<Vec<PlanRow>, PlanSourceError>;
}

/// Fixed in-memory plan source for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanSource {
    rows: Vec<PlanRow>,
}

impl StaticPlanSource {
    /// Create a source serving the given rows.
    #[must_use]
    pub fn new(rows: Vec<PlanRow>) -> Self {
        Self { rows }
    }
}

impl PlanSource for StaticPlanSource {
    fn fetch_rows(&self) -> Result<Vec<PlanRow>, PlanSourceError> {
        Ok(self.rows.clone())
    }
}

/// Convert a raw row into a validated `PlannedOrder`.
///
/// Missing optional columns take the configured defaults; missing entry or
/// stop prices reject the row, as does any domain invariant violation.
pub fn row_to_order(
    row: &PlanRow,
    defaults: &OrderDefaultsConfig,
) -> Result<PlannedOrder, ValidationError> {
    let security_type = SecurityType::parse(&row.security_type)?;
    let action = Action::parse(&row.action)?;
    let order_type = match &row.order_type {
        Some(cell) if !cell.trim().is_empty() => OrderType::parse(cell)?,
        _ => OrderType::Limit,
    };
    let position_strategy = match &row.position_strategy {
        Some(cell) if !cell.trim().is_empty() => PositionStrategy::parse(cell)?,
        _ => PositionStrategy::Core,
    };

    let entry_price = row
        .entry_price
        .ok_or(ValidationError::MissingPrice("entry"))?;
    let stop_loss = row
        .stop_loss
        .ok_or(ValidationError::MissingPrice("stop loss"))?;

    let order = PlannedOrder {
        security_type,
        exchange: row.exchange.trim().to_string(),
        currency: row.currency.trim().to_string(),
        action,
        symbol: row.symbol.trim().to_string(),
        order_type,
        risk_per_trade: row.risk_per_trade.unwrap_or(defaults.risk_per_trade),
        entry_price: Some(entry_price),
        stop_loss: Some(stop_loss),
        risk_reward_ratio: row.risk_reward_ratio.unwrap_or(defaults.risk_reward_ratio),
        position_strategy,
        priority: row.priority.unwrap_or(defaults.priority),
        trading_setup: row.trading_setup.clone(),
        core_timeframe: row.core_timeframe.clone(),
        overall_trend: row.overall_trend.clone(),
        brief_analysis: row.brief_analysis.clone(),
        expiration_date: None,
    };

    order.validate()?;
    Ok(order)
}

/// Convenience for building well-formed rows in tests.
#[must_use]
pub fn basic_row(symbol: &str, action: &str, entry: Decimal, stop: Decimal) -> PlanRow {
    PlanRow {
        security_type: "STK".to_string(),
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        action: action.to_string(),
        symbol: symbol.to_string(),
        entry_price: Some(entry),
        stop_loss: Some(stop),
        ..Default::default()
    }
}
