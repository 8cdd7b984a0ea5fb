//! Domain model for the trading engine.
//!
//! `PlannedOrder` is the central entity: a row of the trading plan carrying
//! everything needed to size, score, and submit a bracket order.
//! `ActiveOrder` tracks a submitted bracket; `ExecutedOrder` records a fill.

mod active_order;
mod events;
mod execution;
mod order;

pub use active_order::{ActiveOrder, ActiveOrderStatus};
pub use events::OrderEvent;
pub use execution::{ExecutedOrder, LabelKind, OrderLabel, ProbabilityScore};
pub use order::{
    Action, OrderKey, OrderState, OrderType, PlannedOrder, PositionStrategy, SecurityType,
    ValidationError,
};
