//! Execution gate configuration.

use serde::{Deserialize, Serialize};

/// Thresholds applied by the execution orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Probability above which the legacy path considers an order likely to fill.
    #[serde(default = "default_fill_probability_threshold")]
    pub fill_probability_threshold: f64,
    /// Minimum fill probability for the legacy (single-layer) path.
    #[serde(default = "default_min_fill_probability")]
    pub min_fill_probability: f64,
}

const fn default_fill_probability_threshold() -> f64 {
    0.7
}

const fn default_min_fill_probability() -> f64 {
    0.4
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_probability_threshold: default_fill_probability_threshold(),
            min_fill_probability: default_min_fill_probability(),
        }
    }
}
