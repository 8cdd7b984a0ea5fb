//! Feature extraction from live market snapshots.

use chrono::{Datelike, Timelike};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::feed::MarketSnapshot;
use crate::models::PlannedOrder;

/// Feature map captured for one probability evaluation.
///
/// Every feature is optional where the underlying data may be missing; the
/// map is persisted as JSON alongside the score for offline analysis.
#[derive(Debug, Clone, Default)]
pub struct FeatureVector {
    map: BTreeMap<String, Value>,
}

impl FeatureVector {
    /// Extract features for an order against the current snapshot.
    #[must_use]
    pub fn extract(order: &PlannedOrder, snapshot: &MarketSnapshot) -> Self {
        let mut features = Self::default();

        // Time features
        let ts = snapshot.timestamp;
        features.set("timestamp", json!(ts.to_rfc3339()));
        let seconds_since_midnight = i64::from(ts.time().num_seconds_from_midnight());
        features.set("time_of_day_seconds", json!(seconds_since_midnight));
        features.set("seconds_since_midnight", json!(seconds_since_midnight));
        features.set(
            "day_of_week",
            json!(ts.weekday().num_days_from_monday()),
        );

        // Market features
        features.set_decimal("current_price", Some(snapshot.price));
        features.set_decimal("bid", snapshot.bid);
        features.set_decimal("ask", snapshot.ask);
        features.set_decimal("bid_size", snapshot.bid_size);
        features.set_decimal("ask_size", snapshot.ask_size);
        features.set_decimal("last", snapshot.last);
        features.set_decimal("volume", snapshot.volume);

        if let Some(spread) = snapshot.spread() {
            features.set_decimal("spread_absolute", Some(spread));
            if !snapshot.price.is_zero() {
                features.set_decimal("spread_relative", Some(spread / snapshot.price));
            }
        }

        // Order features
        features.set("symbol", json!(order.symbol));
        features.set("side", json!(order.action.as_str()));
        features.set("order_type", json!(order.order_type.as_str()));
        features.set_decimal("entry_price", order.entry_price);
        features.set_decimal("stop_loss", order.stop_loss);
        features.set("priority", json!(order.priority));
        if let Some(setup) = &order.trading_setup {
            features.set("trading_setup", json!(setup));
        }
        if let Some(timeframe) = &order.core_timeframe {
            features.set("core_timeframe", json!(timeframe));
        }

        // Derived features. Sign convention: for BUY a negative diff
        // (market below entry) is favorable; for SELL a positive diff is.
        if let Some(entry) = order.entry_price {
            let diff = snapshot.price - entry;
            features.set_decimal("price_diff_absolute", Some(diff));
            if !entry.is_zero() {
                features.set_decimal("price_diff_relative", Some(diff / entry));
            }
        }

        if let Some(volatility) = realized_volatility(&snapshot.history) {
            features.set("volatility", json!(volatility));
        }

        features
    }

    fn set(&mut self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value);
    }

    fn set_decimal(&mut self, key: &str, value: Option<Decimal>) {
        if let Some(value) = value
            && let Some(as_f64) = value.to_f64()
        {
            self.map.insert(key.to_string(), json!(as_f64));
        }
    }

    /// Read a numeric feature.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.map.get(key).and_then(Value::as_f64)
    }

    /// Consume into the persisted map form.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.map
    }
}

/// Standard deviation of log returns over the recent price history.
///
/// Returns `None` with fewer than three points.
#[must_use]
pub fn realized_volatility(history: &[Decimal]) -> Option<f64> {
    if history.len() < 3 {
        return None;
    }

    let prices: Vec<f64> = history.iter().filter_map(Decimal::to_f64).collect();
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|pair| pair[0] > 0.0 && pair[1] > 0.0)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, OrderType, PositionStrategy, SecurityType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_order() -> PlannedOrder {
        PlannedOrder {
            security_type: SecurityType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            action: Action::Buy,
            symbol: "AAPL".to_string(),
            order_type: OrderType::Limit,
            risk_per_trade: dec!(0.005),
            entry_price: Some(dec!(150)),
            stop_loss: Some(dec!(145)),
            risk_reward_ratio: dec!(2.0),
            position_strategy: PositionStrategy::Core,
            priority: 2,
            trading_setup: Some("Breakout".to_string()),
            core_timeframe: Some("1H".to_string()),
            overall_trend: None,
            brief_analysis: None,
            expiration_date: None,
        }
    }

    fn make_snapshot(price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            price,
            bid: Some(price - dec!(0.01)),
            ask: Some(price + dec!(0.01)),
            bid_size: Some(dec!(300)),
            ask_size: Some(dec!(200)),
            last: Some(price),
            volume: Some(dec!(1000000)),
            history: vec![dec!(148), dec!(149), dec!(150), dec!(149.5)],
            timestamp: Utc::now(),
            data_type: None,
        }
    }

    #[test]
    fn test_extract_core_features() {
        let features = FeatureVector::extract(&make_order(), &make_snapshot(dec!(149)));

        assert_eq!(features.get_f64("current_price"), Some(149.0));
        assert_eq!(features.get_f64("entry_price"), Some(150.0));
        // BUY with market below entry: favorable negative diff
        assert_eq!(features.get_f64("price_diff_absolute"), Some(-1.0));
        assert!(features.get_f64("spread_absolute").unwrap() > 0.0);
        assert!(features.get_f64("volatility").is_some());
        let map = features.into_map();
        assert_eq!(map.get("side").and_then(Value::as_str), Some("BUY"));
        assert_eq!(
            map.get("trading_setup").and_then(Value::as_str),
            Some("Breakout")
        );
    }

    #[test]
    fn test_volatility_needs_history() {
        assert!(realized_volatility(&[dec!(100)]).is_none());
        assert!(realized_volatility(&[dec!(100), dec!(101)]).is_none());
        let vol = realized_volatility(&[dec!(100), dec!(101), dec!(100), dec!(102)]).unwrap();
        assert!(vol > 0.0);
    }

    #[test]
    fn test_constant_history_zero_volatility() {
        let vol = realized_volatility(&[dec!(100), dec!(100), dec!(100), dec!(100)]).unwrap();
        assert!(vol.abs() < 1e-12);
    }
}
