//! Execution records, outcome labels, and probability scores.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recorded fill (or pending live submission) against a planned order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedOrder {
    /// Database row id.
    pub id: i64,
    /// Planned order this execution belongs to.
    pub planned_order_id: i64,
    /// Fill price (intended entry price while still SUBMITTED).
    pub filled_price: Decimal,
    /// Filled quantity.
    pub filled_quantity: Decimal,
    /// Commission paid.
    pub commission: Decimal,
    /// Realized P&L once closed.
    pub pnl: Option<Decimal>,
    /// Execution status (SUBMITTED, FILLED, CLOSED, CANCELLED).
    pub status: String,
    /// Execution timestamp.
    pub executed_at: DateTime<Utc>,
    /// Close timestamp, if the position was closed.
    pub closed_at: Option<DateTime<Utc>>,
    /// Whether the position is still open.
    pub is_open: bool,
    /// Whether this execution hit a live account.
    pub is_live_trading: bool,
    /// Account the execution belongs to.
    pub account_number: Option<String>,
    /// Expiration for HYBRID positions.
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Kinds of ML outcome labels derived from executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// 1.0 when the order filled.
    FilledBinary,
    /// Seconds from order creation to execution.
    TimeToFill,
    /// Side-adjusted fill slippage; negative is favorable.
    Slippage,
    /// 1.0 when the closed trade was profitable.
    Profitability,
    /// 1.0 when a high-probability prediction was accurate.
    ProbabilityAccuracy,
}

impl LabelKind {
    /// Wire representation stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FilledBinary => "filled_binary",
            Self::TimeToFill => "time_to_fill",
            Self::Slippage => "slippage",
            Self::Profitability => "profitability",
            Self::ProbabilityAccuracy => "probability_accuracy",
        }
    }
}

/// An outcome label attached to a planned order.
///
/// (planned_order_id, kind) is unique; relabeling overwrites in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLabel {
    /// Planned order the label belongs to.
    pub planned_order_id: i64,
    /// Label kind.
    pub kind: LabelKind,
    /// Label value.
    pub value: f64,
    /// Computation timestamp.
    pub computed_at: DateTime<Utc>,
    /// Human-readable derivation note.
    pub notes: String,
}

/// A persisted fill-probability evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilityScore {
    /// Planned order evaluated.
    pub planned_order_id: i64,
    /// Evaluation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Fill probability in [0, 1].
    pub fill_probability: f64,
    /// Feature map captured at evaluation time.
    pub features: BTreeMap<String, serde_json::Value>,
}
