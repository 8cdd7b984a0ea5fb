//! Monitoring loop configuration.

use serde::{Deserialize, Serialize};

/// Settings for the fixed-cadence monitoring pump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between monitoring iterations.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Consecutive failures tolerated before the loop stops.
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    /// Base seconds for the linear error backoff (backoff = base * errors).
    #[serde(default = "default_error_backoff_base")]
    pub error_backoff_base: u64,
    /// Ceiling on the error backoff in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
    /// Minutes between periodic labeling passes.
    #[serde(default = "default_labeling_interval_minutes")]
    pub labeling_interval_minutes: u64,
}

const fn default_interval_seconds() -> u64 {
    5
}

const fn default_max_errors() -> u32 {
    10
}

const fn default_error_backoff_base() -> u64 {
    60
}

const fn default_max_backoff() -> u64 {
    300
}

const fn default_labeling_interval_minutes() -> u64 {
    10
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_errors: default_max_errors(),
            error_backoff_base: default_error_backoff_base(),
            max_backoff: default_max_backoff(),
            labeling_interval_minutes: default_labeling_interval_minutes(),
        }
    }
}
