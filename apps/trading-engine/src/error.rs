//! Top-level error type for the trading engine.

use thiserror::Error;

/// Errors surfaced to the binary edge.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Durable store failure.
    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),

    /// Broker client failure.
    #[error("Broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    /// Market-data feed failure.
    #[error("Feed error: {0}")]
    Feed(#[from] crate::feed::FeedError),

    /// Startup wiring failure.
    #[error("Startup error: {0}")]
    Startup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_and_display() {
        let error: EngineError = crate::broker::BrokerError::NotConnected.into();
        assert_eq!(error.to_string(), "Broker error: Broker not connected");

        let error = EngineError::Startup("monitoring failed to start".to_string());
        assert!(error.to_string().contains("monitoring failed to start"));
    }
}
