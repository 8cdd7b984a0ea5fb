//! Prioritization weights and toggles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ConfigError;

/// Weights for the second-layer quality score. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    /// Weight of the normalized manual priority.
    #[serde(default = "default_manual_priority")]
    pub manual_priority: f64,
    /// Weight of capital efficiency.
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
    /// Weight of the risk/reward curve score.
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,
    /// Weight of the timeframe compatibility score.
    #[serde(default = "default_timeframe_match")]
    pub timeframe_match: f64,
    /// Weight of the historical setup bias.
    #[serde(default = "default_setup_bias")]
    pub setup_bias: f64,
}

const fn default_manual_priority() -> f64 {
    0.30
}

const fn default_efficiency() -> f64 {
    0.25
}

const fn default_risk_reward() -> f64 {
    0.25
}

const fn default_timeframe_match() -> f64 {
    0.10
}

const fn default_setup_bias() -> f64 {
    0.10
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            manual_priority: default_manual_priority(),
            efficiency: default_efficiency(),
            risk_reward: default_risk_reward(),
            timeframe_match: default_timeframe_match(),
            setup_bias: default_setup_bias(),
        }
    }
}

impl QualityWeights {
    fn sum(&self) -> f64 {
        self.manual_priority
            + self.efficiency
            + self.risk_reward
            + self.timeframe_match
            + self.setup_bias
    }
}

/// Minimum historical evidence before a setup earns a non-neutral bias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupBiasThresholds {
    /// Minimum closed trades required.
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,
    /// Minimum win rate required.
    #[serde(default = "default_min_win_rate")]
    pub min_win_rate: f64,
    /// Minimum profit factor required.
    #[serde(default = "default_min_profit_factor")]
    pub min_profit_factor: f64,
    /// Lookback window in days for setup performance.
    #[serde(default = "default_recent_period_days")]
    pub recent_period_days: u32,
}

const fn default_min_trades() -> u32 {
    10
}

const fn default_min_win_rate() -> f64 {
    0.4
}

const fn default_min_profit_factor() -> f64 {
    1.2
}

const fn default_recent_period_days() -> u32 {
    90
}

impl Default for SetupBiasThresholds {
    fn default() -> Self {
        Self {
            min_trades: default_min_trades(),
            min_win_rate: default_min_win_rate(),
            min_profit_factor: default_min_profit_factor(),
            recent_period_days: default_recent_period_days(),
        }
    }
}

/// Prioritization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritizationConfig {
    /// Toggle for the two-layer pipeline; off falls back to the legacy path.
    #[serde(default = "default_two_layer_enabled")]
    pub two_layer_enabled: bool,
    /// Quality weights for the second layer.
    #[serde(default)]
    pub quality_weights: QualityWeights,
    /// Fraction of equity that may be committed across allocations.
    #[serde(default = "default_max_capital_utilization")]
    pub max_capital_utilization: f64,
    /// Toggle for timeframe/setup-bias scoring inputs.
    #[serde(default = "default_advanced_features")]
    pub enable_advanced_features: bool,
    /// Seconds before the two-layer watchdog fires.
    #[serde(default = "default_watchdog_seconds")]
    pub watchdog_seconds: u64,
    /// Setup bias evidence thresholds.
    #[serde(default)]
    pub setup_bias_thresholds: SetupBiasThresholds,
    /// Dominant timeframe -> compatible order timeframes.
    #[serde(default = "default_timeframe_compatibility")]
    pub timeframe_compatibility: BTreeMap<String, Vec<String>>,
}

const fn default_two_layer_enabled() -> bool {
    true
}

const fn default_max_capital_utilization() -> f64 {
    0.8
}

const fn default_advanced_features() -> bool {
    true
}

const fn default_watchdog_seconds() -> u64 {
    30
}

fn default_timeframe_compatibility() -> BTreeMap<String, Vec<String>> {
    let pairs: [(&str, &[&str]); 8] = [
        ("1min", &["1min", "5min"]),
        ("5min", &["1min", "5min", "15min"]),
        ("15min", &["5min", "15min", "30min", "1H"]),
        ("30min", &["15min", "30min", "1H"]),
        ("1H", &["30min", "1H", "4H", "15min"]),
        ("4H", &["1H", "4H", "1D"]),
        ("1D", &["4H", "1D", "1W"]),
        ("1W", &["1D", "1W"]),
    ];
    pairs
        .into_iter()
        .map(|(key, values)| {
            (
                key.to_string(),
                values.iter().map(|v| (*v).to_string()).collect(),
            )
        })
        .collect()
}

impl Default for PrioritizationConfig {
    fn default() -> Self {
        Self {
            two_layer_enabled: default_two_layer_enabled(),
            quality_weights: QualityWeights::default(),
            max_capital_utilization: default_max_capital_utilization(),
            enable_advanced_features: default_advanced_features(),
            watchdog_seconds: default_watchdog_seconds(),
            setup_bias_thresholds: SetupBiasThresholds::default(),
            timeframe_compatibility: default_timeframe_compatibility(),
        }
    }
}

impl PrioritizationConfig {
    /// Validate weight normalization and utilization bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.quality_weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::ValidationError(format!(
                "quality weights must sum to 1.0, got {sum}"
            )));
        }
        if !(0.0..=1.0).contains(&self.max_capital_utilization) {
            return Err(ConfigError::ValidationError(
                "max_capital_utilization must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!(PrioritizationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unnormalized_weights_rejected() {
        let config = PrioritizationConfig {
            quality_weights: QualityWeights {
                manual_priority: 0.9,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeframe_map_symmetry_for_defaults() {
        let map = default_timeframe_compatibility();
        assert!(map.get("1D").is_some_and(|v| v.contains(&"4H".to_string())));
        assert!(map.get("1W").is_some_and(|v| v.contains(&"1D".to_string())));
    }
}
