//! Tracking state for orders submitted to the broker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::PlannedOrder;

/// Broker-side status of a tracked bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActiveOrderStatus {
    /// Submitted, not yet acknowledged as working.
    Submitted,
    /// Working at the broker.
    Working,
    /// Entry leg filled.
    Filled,
    /// Cancellation requested.
    Cancelling,
}

impl ActiveOrderStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Working => "WORKING",
            Self::Filled => "FILLED",
            Self::Cancelling => "CANCELLING",
        }
    }
}

/// A submitted bracket order being tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOrder {
    /// Engine-side identifier.
    pub id: String,
    /// The planned order this bracket realizes.
    pub planned_order: PlannedOrder,
    /// Broker order identifiers: parent, take-profit, stop.
    pub broker_order_ids: Vec<i64>,
    /// Database row id of the planned order.
    pub planned_order_db_id: i64,
    /// Current status.
    pub status: ActiveOrderStatus,
    /// Notional committed by the entry leg (entry price x quantity).
    pub capital_commitment: Decimal,
    /// Fill probability at submission time.
    pub fill_probability: f64,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Whether this bracket was submitted against a live account.
    pub is_live_trading: bool,
    /// Account the bracket was submitted under.
    pub account_number: Option<String>,
}

impl ActiveOrder {
    /// Symbol of the underlying planned order.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.planned_order.symbol
    }

    /// Whether the order still occupies a slot and its capital.
    #[must_use]
    pub const fn is_working(&self) -> bool {
        matches!(
            self.status,
            ActiveOrderStatus::Submitted | ActiveOrderStatus::Working
        )
    }

    /// Age since submission.
    #[must_use]
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.submitted_at
    }
}

impl std::fmt::Display for ActiveOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ActiveOrder({}, status={}, capital={})",
            self.symbol(),
            self.status.as_str(),
            self.capital_commitment
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, OrderType, PositionStrategy, SecurityType};
    use rust_decimal_macros::dec;

    fn make_active(status: ActiveOrderStatus) -> ActiveOrder {
        let planned = PlannedOrder {
            security_type: SecurityType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            action: Action::Buy,
            symbol: "MSFT".to_string(),
            order_type: OrderType::Limit,
            risk_per_trade: dec!(0.005),
            entry_price: Some(dec!(300)),
            stop_loss: Some(dec!(295)),
            risk_reward_ratio: dec!(2.0),
            position_strategy: PositionStrategy::Core,
            priority: 3,
            trading_setup: None,
            core_timeframe: None,
            overall_trend: None,
            brief_analysis: None,
            expiration_date: None,
        };
        ActiveOrder {
            id: "active-1".to_string(),
            planned_order: planned,
            broker_order_ids: vec![101, 102, 103],
            planned_order_db_id: 1,
            status,
            capital_commitment: dec!(30000),
            fill_probability: 0.9,
            submitted_at: Utc::now(),
            is_live_trading: false,
            account_number: None,
        }
    }

    #[test]
    fn test_working_statuses() {
        assert!(make_active(ActiveOrderStatus::Submitted).is_working());
        assert!(make_active(ActiveOrderStatus::Working).is_working());
        assert!(!make_active(ActiveOrderStatus::Filled).is_working());
        assert!(!make_active(ActiveOrderStatus::Cancelling).is_working());
    }

    #[test]
    fn test_symbol_convenience() {
        assert_eq!(make_active(ActiveOrderStatus::Working).symbol(), "MSFT");
    }
}
