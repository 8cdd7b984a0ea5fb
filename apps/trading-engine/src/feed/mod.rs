//! Market-data feed contract and adapters.
//!
//! The engine never queues market data: the feed serves the most recent
//! snapshot at tick time, and subscriptions only control what the feed
//! keeps fresh.

mod mock;

pub use mock::MockFeed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feed failures.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Feed is not connected.
    #[error("Data feed not connected")]
    NotConnected,

    /// Subscription request failed.
    #[error("Subscription failed for {0}")]
    SubscriptionFailed(String),

    /// Transport-level error.
    #[error("Feed error: {0}")]
    Transport(String),
}

/// Most recent market snapshot for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Reference price (mid or last, feed-dependent).
    pub price: Decimal,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Size at the best bid.
    pub bid_size: Option<Decimal>,
    /// Size at the best ask.
    pub ask_size: Option<Decimal>,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Session volume.
    pub volume: Option<Decimal>,
    /// Recent price history, oldest first.
    pub history: Vec<Decimal>,
    /// Snapshot timestamp.
    pub timestamp: DateTime<Utc>,
    /// Feed-specific data type tag (live, delayed, frozen).
    pub data_type: Option<String>,
}

impl MarketSnapshot {
    /// Absolute bid/ask spread, when both sides are quoted.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

/// Behavioral contract of the market-data feed.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Whether the feed connection is up.
    fn is_connected(&self) -> bool;

    /// Subscribe a symbol for fresh snapshots.
    async fn subscribe(&self, symbol: &str) -> Result<bool, FeedError>;

    /// Unsubscribe a symbol.
    async fn unsubscribe(&self, symbol: &str) -> Result<bool, FeedError>;

    /// Most recent snapshot for a symbol, `None` when no data is available.
    async fn get_current_price(&self, symbol: &str) -> Result<Option<MarketSnapshot>, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_spread_requires_both_sides() {
        let snapshot = MarketSnapshot {
            price: dec!(100),
            bid: Some(dec!(99.99)),
            ask: Some(dec!(100.02)),
            bid_size: None,
            ask_size: None,
            last: None,
            volume: None,
            history: vec![],
            timestamp: Utc::now(),
            data_type: None,
        };
        assert_eq!(snapshot.spread(), Some(dec!(0.03)));

        let one_sided = MarketSnapshot {
            ask: None,
            ..snapshot
        };
        assert_eq!(one_sided.spread(), None);
    }
}
