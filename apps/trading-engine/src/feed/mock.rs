//! Mock market-data feed for testing and simulation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::{FeedError, MarketDataFeed, MarketSnapshot};

/// In-memory feed serving scripted prices.
#[derive(Debug, Default)]
pub struct MockFeed {
    snapshots: RwLock<HashMap<String, MarketSnapshot>>,
    subscriptions: RwLock<Vec<String>>,
    connected: AtomicBool,
}

impl MockFeed {
    /// Create a connected mock feed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(vec![]),
            connected: AtomicBool::new(true),
        }
    }

    /// Set a full snapshot for a symbol.
    pub fn set_snapshot(&self, symbol: &str, snapshot: MarketSnapshot) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.insert(symbol.to_string(), snapshot);
        }
    }

    /// Set a bare price for a symbol with a synthetic one-cent spread.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let spread = Decimal::new(1, 2);
        self.set_snapshot(
            symbol,
            MarketSnapshot {
                price,
                bid: Some(price - spread),
                ask: Some(price + spread),
                bid_size: Some(Decimal::new(100, 0)),
                ask_size: Some(Decimal::new(100, 0)),
                last: Some(price),
                volume: Some(Decimal::new(10_000, 0)),
                history: vec![price],
                timestamp: Utc::now(),
                data_type: Some("mock".to_string()),
            },
        );
    }

    /// Flip the connection flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Currently subscribed symbols.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MarketDataFeed for MockFeed {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, symbol: &str) -> Result<bool, FeedError> {
        if !self.is_connected() {
            return Err(FeedError::NotConnected);
        }
        if let Ok(mut subscriptions) = self.subscriptions.write()
            && !subscriptions.iter().any(|s| s == symbol)
        {
            subscriptions.push(symbol.to_string());
        }
        Ok(true)
    }

    async fn unsubscribe(&self, symbol: &str) -> Result<bool, FeedError> {
        if let Ok(mut subscriptions) = self.subscriptions.write() {
            subscriptions.retain(|s| s != symbol);
        }
        Ok(true)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Option<MarketSnapshot>, FeedError> {
        if !self.is_connected() {
            return Err(FeedError::NotConnected);
        }
        Ok(self
            .snapshots
            .read()
            .ok()
            .and_then(|snapshots| snapshots.get(symbol).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_set_and_get_price() {
        let feed = MockFeed::new();
        feed.set_price("AAPL", dec!(150));

        let snapshot = feed.get_current_price("AAPL").await.unwrap().unwrap();
        assert_eq!(snapshot.price, dec!(150));
        assert_eq!(snapshot.bid, Some(dec!(149.99)));
        assert_eq!(snapshot.ask, Some(dec!(150.01)));
    }

    #[tokio::test]
    async fn test_unknown_symbol_returns_none() {
        let feed = MockFeed::new();
        assert!(feed.get_current_price("ZZZZ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_tracks_symbols_once() {
        let feed = MockFeed::new();
        feed.subscribe("AAPL").await.unwrap();
        feed.subscribe("AAPL").await.unwrap();
        feed.subscribe("MSFT").await.unwrap();
        assert_eq!(feed.subscriptions(), vec!["AAPL", "MSFT"]);

        feed.unsubscribe("AAPL").await.unwrap();
        assert_eq!(feed.subscriptions(), vec!["MSFT"]);
    }

    #[tokio::test]
    async fn test_disconnected_feed_errors() {
        let feed = MockFeed::new();
        feed.set_connected(false);
        assert!(feed.get_current_price("AAPL").await.is_err());
        assert!(feed.subscribe("AAPL").await.is_err());
    }
}
