use std::sync::Arc;
use std::time::Duration;

use common::Vendor;
use common::classify::classify;
use common::envelope::JobEnvelope;
use common::retry::RetryAction;
use mq::{Inbound, MqError, MqttClient};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::activity_log::ActivityLog;
use crate::config::WorkerAppConfig;
use crate::error::WorkerError;
use crate::handler::{ErrorSeverity, HandlerFactory, HandlerRegistry};
use crate::resources::ResourceController;
use crate::retry::RetryManager;

/// Consumes vendor queues under a shared subscription and drives handlers
/// through admission, execution and the retry pipeline.
///
/// The broker session is persistent and keyed by the stable worker id, so
/// QoS-1 messages that arrive while the worker is down are delivered on
/// reconnect. A transport error ends the session; the runtime sleeps the
/// reconnect backoff and builds a fresh one.
pub struct WorkerRuntime {
    config: WorkerAppConfig,
    registry: HandlerRegistry,
    resources: Arc<ResourceController>,
    activity: ActivityLog,
}

impl WorkerRuntime {
    pub fn new(config: WorkerAppConfig, registry: HandlerRegistry) -> Self {
        let resources = Arc::new(ResourceController::new(
            config.worker.max_concurrent,
            config.worker.max_cpu_pct,
            config.worker.max_mem_pct,
        ));
        let activity = ActivityLog::new(&config.worker.activity_log);
        Self {
            config,
            registry,
            resources,
            activity,
        }
    }

    /// Connect-consume-reconnect loop. Returns once `shutdown` flips to true
    /// and in-flight jobs drained (bounded by the grace period).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let group = self.config.worker.effective_group();
        let reconnect = Duration::from_secs(self.config.worker.reconnect_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.consume_session(&group, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_s = reconnect.as_secs(),
                        "Conexión MQTT perdida, reconectando"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(reconnect) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        info!(worker_id = %self.config.worker.id, "Worker detenido");
    }

    /// One broker session: subscribe, consume until shutdown (`Ok`) or
    /// transport loss (`Err`, caller reconnects).
    async fn consume_session(
        &self,
        group: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        let (client, mut stream) =
            MqttClient::connect_consumer(&self.config.mqtt, &self.config.worker.id, true).await?;
        client
            .subscribe_shared(group, self.config.worker.vendor.as_deref())
            .await?;

        let executor = Arc::new(JobExecutor {
            retry: RetryManager::new(Arc::new(client.clone())),
            registry: self.registry.clone(),
            job_timeout: Duration::from_secs(self.config.worker.timeout_secs),
            report_upstream: self.config.general.is_production(),
        });

        let mut tasks: JoinSet<()> = JoinSet::new();
        let session_end = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                next = stream.recv() => match next {
                    None => break Err(WorkerError::Mq(MqError::Connection(
                        "stream de mensajes cerrado".into(),
                    ))),
                    Some(inbound) => {
                        // Reap finished tasks so the set stays small.
                        while tasks.try_join_next().is_some() {}
                        let context = JobContext {
                            client: client.clone(),
                            resources: Arc::clone(&self.resources),
                            activity: self.activity.clone(),
                            executor: Arc::clone(&executor),
                        };
                        tasks.spawn(context.process(inbound));
                    }
                }
            }
        };

        match session_end {
            Ok(()) => {
                let grace = Duration::from_secs(self.config.worker.shutdown_grace_secs);
                info!(pending = tasks.len(), "Apagando worker, drenando tareas");
                let drained = tokio::time::timeout(grace, async {
                    while tasks.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    warn!("Tiempo de gracia agotado, cancelando tareas restantes");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                }
                client.disconnect().await;
                Ok(())
            }
            Err(e) => {
                // In-flight jobs cannot ack over a dead transport; the broker
                // redelivers them after reconnect.
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                Err(e)
            }
        }
    }
}

/// Everything one spawned job task needs.
struct JobContext {
    client: MqttClient,
    resources: Arc<ResourceController>,
    activity: ActivityLog,
    executor: Arc<JobExecutor>,
}

impl JobContext {
    async fn process(self, inbound: Inbound) {
        let topics = self.client.topics();
        let Some(vendor_token) = topics.vendor_from_topic(&inbound.topic) else {
            warn!(topic = %inbound.topic, "Topic sin aseguradora, mensaje descartado");
            self.ack(&inbound).await;
            return;
        };
        let vendor_token = vendor_token.to_string();
        let mut envelope = inbound.envelope.clone();
        let job_id = envelope.job_id.clone();

        self.activity.job_received(&vendor_token, &job_id);
        info!(vendor = %vendor_token, job_id = %job_id, "Recibido job");

        let Ok(vendor) = vendor_token.parse::<Vendor>() else {
            warn!(vendor = %vendor_token, job_id = %job_id, "Aseguradora desconocida, tarea descartada");
            self.ack(&inbound).await;
            return;
        };

        let Some(factory) = self.executor.registry.factory(vendor) else {
            warn!(vendor = %vendor_token, job_id = %job_id, "Bot no implementado, tarea descartada");
            self.ack(&inbound).await;
            return;
        };

        let slot = match self.resources.acquire(&vendor_token, &job_id).await {
            Ok(guard) => guard,
            // No ack: back-pressure is expressed by redelivery.
            Err(_) => return,
        };

        let success = self
            .executor
            .run_with_retries(&vendor_token, &factory, &mut envelope)
            .await;
        drop(slot);

        if success {
            self.activity.job_completed(&vendor_token, &job_id);
            info!(vendor = %vendor_token, job_id = %job_id, "Job completado exitosamente");
        } else {
            self.activity.job_failed(&vendor_token, &job_id);
            if let Some(last) = &envelope.last_error {
                self.activity
                    .job_error(&vendor_token, &job_id, &last.error_code);
            }
            info!(vendor = %vendor_token, job_id = %job_id, "Job completado con errores");
        }

        self.ack(&inbound).await;
    }

    async fn ack(&self, inbound: &Inbound) {
        if let Err(e) = self.client.ack(inbound).await {
            warn!(error = %e, "Error confirmando mensaje");
        }
    }
}

/// Runs handler attempts and routes failures through the retry manager.
struct JobExecutor {
    retry: RetryManager,
    registry: HandlerRegistry,
    job_timeout: Duration,
    report_upstream: bool,
}

impl JobExecutor {
    /// First attempt plus at most one immediate in-place retry; requeue and
    /// DLQ publishing happen inside the retry manager. Returns overall
    /// success.
    async fn run_with_retries(
        &self,
        vendor: &str,
        factory: &HandlerFactory,
        envelope: &mut JobEnvelope,
    ) -> bool {
        match self.attempt(factory, envelope).await {
            Ok(done) => done,
            Err(err) => {
                let action = self
                    .retry
                    .handle_failure(vendor, envelope, &err, false)
                    .await;
                if action != RetryAction::ImmediateRetry {
                    return false;
                }
                info!(job_id = %envelope.job_id, "Reintento inmediato");
                match self.attempt(factory, envelope).await {
                    Ok(done) => done,
                    Err(second) => {
                        self.retry
                            .handle_failure(vendor, envelope, &second, true)
                            .await;
                        false
                    }
                }
            }
        }
    }

    /// One handler lifecycle: setup, run under the job timeout, teardown on
    /// every path. A timeout surfaces as a transient failure.
    async fn attempt(
        &self,
        factory: &HandlerFactory,
        envelope: &JobEnvelope,
    ) -> anyhow::Result<bool> {
        let mut handler = factory(envelope.job_id.clone(), envelope.payload.clone());
        handler.setup().await?;

        let outcome = tokio::time::timeout(self.job_timeout, handler.run()).await;
        let result = match outcome {
            Ok(run_result) => run_result,
            Err(elapsed) => Err(anyhow::Error::new(elapsed)),
        };

        if let Err(err) = &result
            && self.report_upstream
        {
            let classification = classify(err);
            handler
                .report_error(
                    &classification.error_code,
                    &err.to_string(),
                    ErrorSeverity::Error,
                )
                .await;
        }

        handler.teardown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::QuoteHandler;
    use crate::retry::JobSink;
    use async_trait::async_trait;
    use common::HandlerError;
    use serde_json::Map;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        queued: Mutex<Vec<JobEnvelope>>,
        dead: Mutex<Vec<JobEnvelope>>,
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn publish_job(&self, _vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
            self.queued.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        async fn publish_dlq(&self, _vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
            self.dead.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    /// Fails `failures` times with the given error, then succeeds.
    struct FlakyHandler {
        failures: Arc<AtomicU32>,
        error: fn() -> anyhow::Error,
    }

    #[async_trait]
    impl QuoteHandler for FlakyHandler {
        async fn setup(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(&mut self) -> anyhow::Result<bool> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(true)
        }

        async fn teardown(&mut self) {}

        async fn report_error(&self, _code: &str, _message: &str, _severity: ErrorSeverity) {}
    }

    fn executor(sink: Arc<RecordingSink>) -> JobExecutor {
        JobExecutor {
            retry: RetryManager::new(sink),
            registry: HandlerRegistry::new(),
            job_timeout: Duration::from_secs(300),
            report_upstream: false,
        }
    }

    fn flaky_factory(failures: u32, error: fn() -> anyhow::Error) -> HandlerFactory {
        let counter = Arc::new(AtomicU32::new(failures));
        Arc::new(move |_job_id, _payload| {
            Box::new(FlakyHandler {
                failures: Arc::clone(&counter),
                error,
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success_stays_off_the_wire() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone());
        let factory = flaky_factory(1, || anyhow::anyhow!("stale element reference"));
        let mut envelope = JobEnvelope::new("job-1", Map::new());

        let success = exec.run_with_retries("hdi", &factory, &mut envelope).await;
        assert!(success);
        // The immediate retry resolved it: no requeue, no DLQ, clean history.
        assert!(sink.queued.lock().unwrap().is_empty());
        assert!(sink.dead.lock().unwrap().is_empty());
        assert!(envelope.error_history.is_empty());
        assert_eq!(envelope.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_requeues_once() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone());
        let factory = flaky_factory(2, || anyhow::anyhow!("element is not attached to the DOM"));
        let mut envelope = JobEnvelope::new("job-1", Map::new());

        let success = exec.run_with_retries("hdi", &factory, &mut envelope).await;
        assert!(!success);
        let queued = sink.queued.lock().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 1);
        assert_eq!(queued[0].error_history.len(), 1);
        assert_eq!(queued[0].error_history[0].error_code, "STALE_ELEMENT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_goes_to_dlq_without_immediate_retry() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone());
        let factory = flaky_factory(5, || {
            anyhow::Error::new(HandlerError::authentication("credenciales inválidas"))
        });
        let mut envelope = JobEnvelope::new("job-1", Map::new());

        let success = exec.run_with_retries("sbs", &factory, &mut envelope).await;
        assert!(!success);
        assert!(sink.queued.lock().unwrap().is_empty());
        let dead = sink.dead.lock().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].last_error.as_ref().unwrap().error_type,
            common::ErrorType::Permanent
        );
        assert_eq!(dead[0].retry_count, 0);
    }

    /// A handler that never returns within the job timeout is treated as a
    /// transient timeout: one immediate retry, then requeue.
    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_is_transient() {
        struct HangingHandler;

        #[async_trait]
        impl QuoteHandler for HangingHandler {
            async fn setup(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
            async fn run(&mut self) -> anyhow::Result<bool> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
            async fn teardown(&mut self) {}
            async fn report_error(&self, _c: &str, _m: &str, _s: ErrorSeverity) {}
        }

        let sink = Arc::new(RecordingSink::default());
        let exec = JobExecutor {
            retry: RetryManager::new(sink.clone()),
            registry: HandlerRegistry::new(),
            job_timeout: Duration::from_secs(1),
            report_upstream: false,
        };
        let factory: HandlerFactory = Arc::new(|_id, _payload| Box::new(HangingHandler));
        let mut envelope = JobEnvelope::new("job-1", Map::new());

        let success = exec.run_with_retries("axa", &factory, &mut envelope).await;
        assert!(!success);
        let queued = sink.queued.lock().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].error_history[0].error_code, "TIMEOUT");
    }

    /// `run` returning false is a business failure: logged, acked, no retry.
    #[tokio::test]
    async fn test_unsuccessful_run_does_not_retry() {
        struct FalseHandler;

        #[async_trait]
        impl QuoteHandler for FalseHandler {
            async fn setup(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
            async fn run(&mut self) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn teardown(&mut self) {}
            async fn report_error(&self, _c: &str, _m: &str, _s: ErrorSeverity) {}
        }

        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone());
        let factory: HandlerFactory = Arc::new(|_id, _payload| Box::new(FalseHandler));
        let mut envelope = JobEnvelope::new("job-1", Map::new());

        let success = exec.run_with_retries("hdi", &factory, &mut envelope).await;
        assert!(!success);
        assert!(sink.queued.lock().unwrap().is_empty());
        assert!(sink.dead.lock().unwrap().is_empty());
    }
}
