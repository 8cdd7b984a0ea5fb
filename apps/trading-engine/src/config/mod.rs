//! Configuration for the trading engine.
//!
//! Loads a YAML file into typed sections. Every section has hardcoded
//! defaults so a missing file degrades to a usable paper configuration
//! with a logged warning; a present-but-invalid file is a startup error.

mod end_of_day;
mod execution;
mod monitoring;
mod order_defaults;
mod persistence;
mod prioritization;
mod reconciliation;
mod risk;
mod simulation;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use end_of_day::EndOfDayConfig;
pub use execution::ExecutionConfig;
pub use monitoring::MonitoringConfig;
pub use order_defaults::OrderDefaultsConfig;
pub use persistence::PersistenceConfig;
pub use prioritization::{PrioritizationConfig, QualityWeights, SetupBiasThresholds};
pub use reconciliation::ReconciliationConfig;
pub use risk::RiskLimitsConfig;
pub use simulation::SimulationConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hard risk limits and trading halts.
    #[serde(default)]
    pub risk_limits: RiskLimitsConfig,
    /// Execution gates and thresholds.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Defaults applied to sparse plan rows.
    #[serde(default)]
    pub order_defaults: OrderDefaultsConfig,
    /// Simulation-mode settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Monitoring loop settings.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// End-of-day policy settings.
    #[serde(default)]
    pub end_of_day: EndOfDayConfig,
    /// Reconciliation loop settings.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Prioritization weights and toggles.
    #[serde(default)]
    pub prioritization: PrioritizationConfig,
    /// Database settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk_limits.validate()?;
        self.prioritization.validate()?;
        Ok(())
    }
}

/// Load configuration from a YAML file.
///
/// A missing file is not fatal: the hardcoded defaults are returned with a
/// logged warning. A file that exists but fails to parse or validate is a
/// startup error.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            warn!(path, "Config file not found, using built-in defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::ReadError {
                path: path.to_string(),
                source,
            });
        }
    };

    let config: Config = serde_yaml_bw::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}
