//! Simulation-mode configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settings for running without a connected broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Equity assumed when no live account value is available.
    #[serde(default = "default_equity")]
    pub default_equity: Decimal,
}

fn default_equity() -> Decimal {
    Decimal::new(100_000, 0)
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_equity: default_equity(),
        }
    }
}
