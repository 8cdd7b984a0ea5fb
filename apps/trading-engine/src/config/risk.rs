//! Risk limit configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Hard risk limits enforced by the risk management service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimitsConfig {
    /// Daily realized-loss halt threshold as a fraction of equity.
    #[serde(default = "default_daily_loss_pct")]
    pub daily_loss_pct: Decimal,
    /// Weekly realized-loss halt threshold as a fraction of equity.
    #[serde(default = "default_weekly_loss_pct")]
    pub weekly_loss_pct: Decimal,
    /// Monthly realized-loss halt threshold as a fraction of equity.
    #[serde(default = "default_monthly_loss_pct")]
    pub monthly_loss_pct: Decimal,
    /// Maximum simultaneously working orders.
    #[serde(default = "default_max_open_orders")]
    pub max_open_orders: usize,
    /// Cap applied to per-order risk_per_trade.
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: Decimal,
    /// Single-trade capital cap for CORE/HYBRID, as a fraction of equity.
    #[serde(default = "default_single_trade_pct")]
    pub single_trade_pct: Decimal,
    /// Aggregate CORE/HYBRID exposure cap, as a fraction of equity.
    #[serde(default = "default_total_exposure_pct")]
    pub total_exposure_pct: Decimal,
    /// Seconds a halt evaluation stays cached before recomputation.
    #[serde(default = "default_halt_check_interval_secs")]
    pub halt_check_interval_secs: u64,
}

fn default_daily_loss_pct() -> Decimal {
    Decimal::new(2, 2)
}

fn default_weekly_loss_pct() -> Decimal {
    Decimal::new(5, 2)
}

fn default_monthly_loss_pct() -> Decimal {
    Decimal::new(8, 2)
}

const fn default_max_open_orders() -> usize {
    5
}

fn default_max_risk_per_trade() -> Decimal {
    Decimal::new(2, 2)
}

fn default_single_trade_pct() -> Decimal {
    Decimal::new(20, 2)
}

fn default_total_exposure_pct() -> Decimal {
    Decimal::new(60, 2)
}

const fn default_halt_check_interval_secs() -> u64 {
    300
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            daily_loss_pct: default_daily_loss_pct(),
            weekly_loss_pct: default_weekly_loss_pct(),
            monthly_loss_pct: default_monthly_loss_pct(),
            max_open_orders: default_max_open_orders(),
            max_risk_per_trade: default_max_risk_per_trade(),
            single_trade_pct: default_single_trade_pct(),
            total_exposure_pct: default_total_exposure_pct(),
            halt_check_interval_secs: default_halt_check_interval_secs(),
        }
    }
}

impl RiskLimitsConfig {
    /// Validate that the limits are internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_risk_per_trade <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "max_risk_per_trade must be positive".to_string(),
            ));
        }
        if self.daily_loss_pct > self.weekly_loss_pct
            || self.weekly_loss_pct > self.monthly_loss_pct
        {
            return Err(ConfigError::ValidationError(
                "loss limits must be non-decreasing across daily/weekly/monthly".to_string(),
            ));
        }
        if self.single_trade_pct > self.total_exposure_pct {
            return Err(ConfigError::ValidationError(
                "single_trade_pct cannot exceed total_exposure_pct".to_string(),
            ));
        }
        Ok(())
    }
}
