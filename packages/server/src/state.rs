use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::envelope::JobEnvelope;
use mq::{MqError, MqttClient};

use crate::config::AppConfig;
use crate::dlq::DlqManager;
use crate::health::HealthMonitor;
use crate::metrics::MetricsCollector;

/// Publishing side of the broker client as seen by the HTTP layer.
/// Tests substitute a recorder.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish_job(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError>;

    async fn ping(&self, timeout: Duration) -> bool;

    fn connected(&self) -> bool;
}

#[async_trait]
impl JobPublisher for MqttClient {
    async fn publish_job(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
        MqttClient::publish_job(self, vendor, envelope).await
    }

    async fn ping(&self, timeout: Duration) -> bool {
        MqttClient::ping(self, timeout).await
    }

    fn connected(&self) -> bool {
        MqttClient::connected(self)
    }
}

/// Composition root handed to every handler. Built once in `main`; no
/// import-time singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub publisher: Arc<dyn JobPublisher>,
    pub dlq: Arc<DlqManager>,
    pub health: Arc<HealthMonitor>,
    pub metrics: Arc<MetricsCollector>,
}
