//! Database configuration.

use serde::{Deserialize, Serialize};

/// Settings for the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the local database file. `:memory:` keeps everything in RAM.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "trading-engine.db".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
