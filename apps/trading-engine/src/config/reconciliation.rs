//! Reconciliation loop configuration.

use serde::{Deserialize, Serialize};

/// Settings for the broker reconciliation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Seconds between reconciliation cycles.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Consecutive failures tolerated before the worker stops.
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    /// Base seconds for the linear error backoff.
    #[serde(default = "default_error_backoff_base")]
    pub error_backoff_base: u64,
    /// Ceiling on the error backoff in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
}

const fn default_interval_seconds() -> u64 {
    30
}

const fn default_max_errors() -> u32 {
    5
}

const fn default_error_backoff_base() -> u64 {
    60
}

const fn default_max_backoff() -> u64 {
    300
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_errors: default_max_errors(),
            error_backoff_base: default_error_backoff_base(),
            max_backoff: default_max_backoff(),
        }
    }
}
