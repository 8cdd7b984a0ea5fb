//! Discrepancy types for broker reconciliation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Kind of divergence between internal and broker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Order on the broker book with no internal counterpart.
    OrphanedOrder,
    /// Internal working order absent from the broker book.
    MissingOrder,
    /// Both present but the states disagree.
    StatusMismatch,
    /// Position quantity differs between broker and internal records.
    PositionMismatch,
}

impl DiscrepancyKind {
    /// Label for logs and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrphanedOrder => "orphaned_order",
            Self::MissingOrder => "missing_order",
            Self::StatusMismatch => "status_mismatch",
            Self::PositionMismatch => "position_mismatch",
        }
    }
}

/// One detected divergence.
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    /// Kind of divergence.
    pub kind: DiscrepancyKind,
    /// Symbol involved.
    pub symbol: String,
    /// Internal-side description.
    pub internal_state: String,
    /// Broker-side description.
    pub broker_state: String,
    /// Detection timestamp.
    pub detected_at: DateTime<Utc>,
}

/// Report of one reconciliation cycle.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    /// All divergences found this cycle.
    pub discrepancies: Vec<Discrepancy>,
    /// Broker orders examined.
    pub broker_orders: usize,
    /// Internal working orders examined.
    pub internal_orders: usize,
    /// Positions compared.
    pub positions_compared: usize,
    /// Internal orders synchronized to broker truth this cycle.
    pub synchronized: usize,
    /// Cycle wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconciliationReport {
    /// Whether the cycle found no divergence.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    /// Discrepancies of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: DiscrepancyKind) -> Vec<&Discrepancy> {
        self.discrepancies
            .iter()
            .filter(|d| d.kind == kind)
            .collect()
    }
}

/// Price match tolerance for order identity: one cent.
pub const PRICE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
