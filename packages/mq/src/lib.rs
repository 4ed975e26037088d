pub mod client;
pub mod error;
pub mod stats;
pub mod topics;

pub use client::{Inbound, MessageStream, MqttClient};
pub use error::MqError;
pub use stats::BrokerStatsClient;
pub use topics::TopicScheme;
