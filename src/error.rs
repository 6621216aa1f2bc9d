//! Crate-level error type for the client helpers and the demo binary.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigError;

/// Errors surfaced by [`crate::client`] and process wiring.
#[derive(Debug, Error)]
pub enum Error {
    /// Produce or delivery failed at the broker.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Payload could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metrics exporter could not be installed.
    #[error("Metrics exporter error: {0}")]
    Metrics(String),

    /// The OpenTelemetry SDK failed to flush or shut down.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// `start` called on a running consumer.
    #[error("Consumer already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, Error>;
