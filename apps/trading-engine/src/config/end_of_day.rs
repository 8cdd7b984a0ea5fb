//! End-of-day policy configuration.

use serde::{Deserialize, Serialize};

/// Settings for end-of-day position management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndOfDayConfig {
    /// Master switch for the EOD service.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minutes before market close in which positions get closed.
    #[serde(default = "default_close_buffer_minutes")]
    pub close_buffer_minutes: i64,
    /// Minutes before market open that the pre-market window starts.
    #[serde(default = "default_pre_market_start_minutes")]
    pub pre_market_start_minutes: i64,
    /// Minutes after market close that the post-market window lasts.
    #[serde(default = "default_post_market_end_minutes")]
    pub post_market_end_minutes: i64,
    /// Per-position cap on close attempts.
    #[serde(default = "default_max_close_attempts")]
    pub max_close_attempts: u32,
    /// Close DAY positions during the closing window.
    #[serde(default = "default_true")]
    pub close_day_positions: bool,
    /// Close HYBRID positions whose expiration has passed.
    #[serde(default = "default_true")]
    pub close_expired_hybrid: bool,
    /// Expire the planned orders behind closed positions.
    #[serde(default = "default_true")]
    pub expire_planned_orders: bool,
    /// Never touch CORE positions.
    #[serde(default = "default_true")]
    pub leave_core_positions: bool,
}

const fn default_enabled() -> bool {
    true
}

const fn default_close_buffer_minutes() -> i64 {
    15
}

const fn default_pre_market_start_minutes() -> i64 {
    30
}

const fn default_post_market_end_minutes() -> i64 {
    30
}

const fn default_max_close_attempts() -> u32 {
    3
}

const fn default_true() -> bool {
    true
}

impl Default for EndOfDayConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            close_buffer_minutes: default_close_buffer_minutes(),
            pre_market_start_minutes: default_pre_market_start_minutes(),
            post_market_end_minutes: default_post_market_end_minutes(),
            max_close_attempts: default_max_close_attempts(),
            close_day_positions: true,
            close_expired_hybrid: true,
            expire_planned_orders: true,
            leave_core_positions: true,
        }
    }
}
