// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Trading Engine - Rust Core Library
//!
//! Automated trading engine that ingests a human-authored trading plan,
//! evaluates live market data against planned orders, scores each order by
//! fill probability and strategic priority, allocates finite capital across
//! the best candidates, submits bracket orders to the broker, and
//! reconciles internal state against broker reality.
//!
//! # Pipeline (per tick)
//!
//! 1. `loading` merges planned orders from database, plan sheet, and broker
//! 2. `probability` scores fill likelihood from the live snapshot
//! 3. `prioritization` ranks viable orders and awards capital and slots
//! 4. `risk` gates each submission against loss halts and exposure caps
//! 5. `execution` sizes, margin-checks, and submits bracket orders
//! 6. `state` publishes every accepted lifecycle transition
//!
//! Independently, `reconciliation` converges internal state with the broker
//! on an interval, and `eod` closes DAY and expired-HYBRID positions in the
//! closing window. `manager` wires it all together and owns the workers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod config;
pub mod eod;
pub mod error;
pub mod execution;
pub mod feed;
pub mod labeling;
pub mod loading;
pub mod manager;
pub mod models;
pub mod monitoring;
pub mod persistence;
pub mod prioritization;
pub mod probability;
pub mod reconciliation;
pub mod risk;
pub mod sizing;
pub mod state;
pub mod telemetry;

pub use broker::{BrokerClient, BrokerError, BrokerOrder, BrokerPosition, SimulatedBroker};
pub use config::{Config, ConfigError, load_config};
pub use error::EngineError;
pub use execution::{ActiveOrderBook, BracketOrderManager, ExecutionOrchestrator};
pub use feed::{FeedError, MarketDataFeed, MarketSnapshot, MockFeed};
pub use manager::{TickSummary, TradingManager};
pub use models::{
    Action, ActiveOrder, ActiveOrderStatus, ExecutedOrder, OrderEvent, OrderState, OrderType,
    PlannedOrder, PositionStrategy, SecurityType,
};
pub use persistence::{PersistenceError, TradingStore};
pub use state::StateService;
