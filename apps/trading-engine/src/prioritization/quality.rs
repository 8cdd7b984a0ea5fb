//! Component scores for the two-layer quality pipeline.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::PrioritizationConfig;
use crate::models::PlannedOrder;
use crate::sizing::PositionSizingService;

/// Dominant-timeframe provider (market-context collaborator).
pub trait MarketContext: Send + Sync {
    /// Dominant timeframe currently observed for a symbol.
    fn dominant_timeframe(&self, symbol: &str) -> Option<String>;
}

/// Fixed symbol -> timeframe mapping for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct StaticMarketContext {
    map: std::collections::HashMap<String, String>,
}

impl StaticMarketContext {
    /// Create a context reporting `timeframe` for every listed symbol.
    #[must_use]
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            map: entries
                .iter()
                .map(|(symbol, timeframe)| ((*symbol).to_string(), (*timeframe).to_string()))
                .collect(),
        }
    }
}

impl MarketContext for StaticMarketContext {
    fn dominant_timeframe(&self, symbol: &str) -> Option<String> {
        self.map.get(symbol).cloned()
    }
}

/// Individual components of one quality score.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityComponents {
    /// Normalized manual priority in [0.2, 1.0].
    pub priority_norm: f64,
    /// Expected profit per committed dollar, clamped to >= 0.
    pub efficiency: f64,
    /// Risk/reward curve score.
    pub risk_reward_score: f64,
    /// Timeframe compatibility score.
    pub timeframe_match: f64,
    /// Historical setup bias.
    pub setup_bias: f64,
}

/// priority 1 -> 1.0 ... priority 5 -> 0.2.
#[must_use]
pub fn priority_norm(priority: u8) -> f64 {
    let clamped = i32::from(priority).clamp(1, 5);
    f64::from(6 - clamped) / 5.0
}

/// Expected total profit per committed dollar. Zero on any missing or
/// degenerate input.
#[must_use]
pub fn efficiency(
    order: &PlannedOrder,
    sizing: &PositionSizingService,
    equity: Decimal,
) -> f64 {
    let Some(entry) = order.entry_price else {
        return 0.0;
    };
    let Ok(quantity) = sizing.calculate_order_quantity(order, equity) else {
        return 0.0;
    };
    let capital_commitment = entry * quantity;
    if capital_commitment <= Decimal::ZERO {
        return 0.0;
    }
    let Ok(profit_target) = order.profit_target() else {
        return 0.0;
    };
    let expected_profit_total = (profit_target - entry).abs() * quantity;
    (expected_profit_total / capital_commitment)
        .to_f64()
        .unwrap_or(0.0)
        .max(0.0)
}

/// Risk/reward curve: 1:1 -> 0.5, 3:1 -> 1.0, capped at 1.2, then damped
/// for the lower odds of reaching distant targets (floor 0.6x).
#[must_use]
pub fn risk_reward_score(risk_reward_ratio: Decimal) -> f64 {
    let rr = risk_reward_ratio.to_f64().unwrap_or(1.0);
    let base = (0.5 + (rr - 1.0) * 0.25).min(1.2);
    let probability_adjustment = (1.0 - (rr - 1.0) * 0.1).max(0.6);
    base * probability_adjustment
}

/// Timeframe compatibility against the dominant market timeframe.
///
/// 1.0 on exact match, 0.7 when in the compatibility set, 0.3 when
/// incompatible; 0.5 whenever advanced features are off or the context
/// service is unavailable.
#[must_use]
pub fn timeframe_match_score(
    order: &PlannedOrder,
    config: &PrioritizationConfig,
    context: Option<&dyn MarketContext>,
) -> f64 {
    if !config.enable_advanced_features {
        return 0.5;
    }
    let Some(context) = context else {
        return 0.5;
    };
    let Some(dominant) = context.dominant_timeframe(&order.symbol) else {
        return 0.5;
    };
    let Some(order_timeframe) = &order.core_timeframe else {
        return 0.5;
    };

    if *order_timeframe == dominant {
        return 1.0;
    }
    let compatible = config
        .timeframe_compatibility
        .get(&dominant)
        .is_some_and(|set| set.contains(order_timeframe));
    if compatible { 0.7 } else { 0.3 }
}
