//! Broker client contract and adapters.
//!
//! The real brokerage transport is a collaborator; the engine only depends
//! on this capability set. The simulated adapter backs tests and
//! disconnected (paper) operation.

mod sim;

pub use sim::SimulatedBroker;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PlannedOrder;

/// Broker failures.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Broker is not connected.
    #[error("Broker not connected")]
    NotConnected,

    /// Broker rejected the order.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Transport-level error.
    #[error("Broker error: {0}")]
    Transport(String),
}

/// An open order as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Broker order id.
    pub order_id: i64,
    /// Instrument symbol.
    pub symbol: String,
    /// BUY / SELL / SSHORT.
    pub action: String,
    /// Order type (LMT, STP, ...).
    pub order_type: String,
    /// Limit price, when applicable.
    pub lmt_price: Option<Decimal>,
    /// Auxiliary (stop/trigger) price, when applicable.
    pub aux_price: Option<Decimal>,
    /// Total quantity.
    pub total_quantity: Decimal,
    /// Quantity still unfilled.
    pub remaining_quantity: Decimal,
    /// Broker-side status string.
    pub status: String,
    /// Parent order id for bracket children, zero for parents.
    pub parent_id: i64,
}

impl BrokerOrder {
    /// Heuristic for orders that originate from this engine's brackets:
    /// bracket legs carry a parent id, are LMT or STP, and are untouched.
    #[must_use]
    pub fn looks_like_bracket_leg(&self) -> bool {
        self.parent_id != 0
            && matches!(self.order_type.as_str(), "LMT" | "STP")
            && self.remaining_quantity == self.total_quantity
    }
}

/// A position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Instrument symbol.
    pub symbol: String,
    /// Signed position quantity.
    pub quantity: Decimal,
    /// Average cost.
    pub avg_cost: Decimal,
}

/// Behavioral contract of the brokerage client.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Whether the session is connected.
    fn connected(&self) -> bool;

    /// Whether the connected account is a paper account.
    fn is_paper_account(&self) -> bool;

    /// Account identifier.
    fn account_number(&self) -> Option<String>;

    /// Net liquidation value of the account.
    async fn get_account_value(&self) -> Result<Decimal, BrokerError>;

    /// Submit a bracket (parent entry + take-profit + stop). Returns the
    /// three broker order ids on success.
    async fn place_bracket_order(
        &self,
        order: &PlannedOrder,
        quantity: Decimal,
        equity: Decimal,
    ) -> Result<Vec<i64>, BrokerError>;

    /// Cancel an order by broker id.
    async fn cancel_order(&self, order_id: i64) -> Result<bool, BrokerError>;

    /// All open orders on the account.
    async fn get_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// All open positions on the account.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(parent_id: i64, order_type: &str, remaining: Decimal) -> BrokerOrder {
        BrokerOrder {
            order_id: 10,
            symbol: "TSLA".to_string(),
            action: "BUY".to_string(),
            order_type: order_type.to_string(),
            lmt_price: Some(dec!(250)),
            aux_price: None,
            total_quantity: dec!(100),
            remaining_quantity: remaining,
            status: "Submitted".to_string(),
            parent_id,
        }
    }

    #[test]
    fn test_bracket_leg_heuristic() {
        assert!(make_order(5, "LMT", dec!(100)).looks_like_bracket_leg());
        assert!(make_order(5, "STP", dec!(100)).looks_like_bracket_leg());
        // No parent: standalone order
        assert!(!make_order(0, "LMT", dec!(100)).looks_like_bracket_leg());
        // Partially filled legs are not resumable
        assert!(!make_order(5, "LMT", dec!(40)).looks_like_bracket_leg());
        assert!(!make_order(5, "MKT", dec!(100)).looks_like_bracket_leg());
    }
}
