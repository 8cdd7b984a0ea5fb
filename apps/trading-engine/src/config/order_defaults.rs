//! Defaults applied to sparse plan rows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Column defaults applied when plan-sheet cells are empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDefaultsConfig {
    /// Default risk per trade when the column is empty.
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Decimal,
    /// Default risk/reward ratio when the column is empty.
    #[serde(default = "default_risk_reward_ratio")]
    pub risk_reward_ratio: Decimal,
    /// Default manual priority when the column is empty.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_risk_per_trade() -> Decimal {
    Decimal::new(5, 3)
}

fn default_risk_reward_ratio() -> Decimal {
    Decimal::new(2, 0)
}

const fn default_priority() -> u8 {
    3
}

impl Default for OrderDefaultsConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            risk_reward_ratio: default_risk_reward_ratio(),
            priority: default_priority(),
        }
    }
}
