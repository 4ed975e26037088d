use std::time::Duration;

use thiserror::Error;

/// Broker client error.
#[derive(Debug, Error)]
pub enum MqError {
    #[error("No conectado al broker MQTT")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Ack error: {0}")]
    Ack(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}
