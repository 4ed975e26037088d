use std::sync::Arc;

use async_trait::async_trait;
use common::classify::classify;
use common::envelope::{ErrorDetail, JobEnvelope};
use common::retry::{RetryAction, backoff_delay, decide};
use mq::{MqError, MqttClient};
use tracing::{error, info, warn};

/// Where retried and dead-lettered envelopes get published. Implemented by
/// the broker client; tests substitute a recorder.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn publish_job(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError>;
    async fn publish_dlq(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError>;
}

#[async_trait]
impl JobSink for MqttClient {
    async fn publish_job(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
        MqttClient::publish_job(self, vendor, envelope).await
    }

    async fn publish_dlq(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
        MqttClient::publish_dlq(self, vendor, envelope).await
    }
}

/// Multi-tier retry manager.
///
/// Tier 1: transient failures get one immediate in-place retry.
/// Tier 2: retriable failures requeue with exponential backoff.
/// Tier 3: permanent failures and exhausted budgets go to the DLQ.
pub struct RetryManager {
    sink: Arc<dyn JobSink>,
}

impl RetryManager {
    pub fn new(sink: Arc<dyn JobSink>) -> Self {
        Self { sink }
    }

    /// Classify the failure, pick the retry tier and perform it.
    ///
    /// `ImmediateRetry` performs nothing here; the caller re-runs the handler
    /// in place without touching the envelope. `Requeue` and `Dlq` record the
    /// error on the envelope and publish it.
    pub async fn handle_failure(
        &self,
        vendor: &str,
        envelope: &mut JobEnvelope,
        err: &anyhow::Error,
        already_immediately_retried: bool,
    ) -> RetryAction {
        let classification = classify(err);
        info!(
            job_id = %envelope.job_id,
            error_type = %classification.error_type,
            error_code = %classification.error_code,
            retry_count = envelope.retry_count,
            max_retries = envelope.max_retries,
            "Fallo clasificado"
        );

        let action = decide(envelope, classification.error_type, already_immediately_retried);
        let detail = ErrorDetail::new(
            classification.error_type,
            classification.error_code,
            err.to_string(),
        );

        match action {
            RetryAction::ImmediateRetry => {}
            RetryAction::Requeue => self.requeue_with_delay(vendor, envelope, detail).await,
            RetryAction::Dlq => self.send_to_dlq(vendor, envelope, detail).await,
        }
        action
    }

    /// Republish to the origin queue after `2^retry_count` seconds.
    async fn requeue_with_delay(
        &self,
        vendor: &str,
        envelope: &mut JobEnvelope,
        detail: ErrorDetail,
    ) {
        envelope.add_error(detail);
        envelope.increment_retry();

        let delay = backoff_delay(envelope.retry_count);
        info!(
            job_id = %envelope.job_id,
            retry_count = envelope.retry_count,
            max_retries = envelope.max_retries,
            delay_s = delay.as_secs(),
            "Reencolando con backoff"
        );
        tokio::time::sleep(delay).await;

        if let Err(e) = self.sink.publish_job(vendor, envelope).await {
            error!(job_id = %envelope.job_id, error = %e, "Error reencolando tarea");
        }
    }

    /// Divert to the vendor's dead-letter topic. `retry_count` stays as-is.
    async fn send_to_dlq(&self, vendor: &str, envelope: &mut JobEnvelope, detail: ErrorDetail) {
        envelope.add_error(detail);

        warn!(
            job_id = %envelope.job_id,
            vendor = %vendor,
            retry_count = envelope.retry_count,
            errors = envelope.error_history.len(),
            "Enviando a DLQ"
        );

        if let Err(e) = self.sink.publish_dlq(vendor, envelope).await {
            error!(job_id = %envelope.job_id, error = %e, "Error publicando a DLQ");
        }
    }
}
