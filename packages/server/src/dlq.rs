use std::collections::HashMap;
use std::time::Duration;

use common::config::MqttSettings;
use common::envelope::JobEnvelope;
use mq::{MqError, MqttClient, TopicScheme};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Stable client id of the persistent DLQ subscriber session.
const DLQ_MANAGER_CLIENT_ID: &str = "dlq-manager";
/// Ephemeral client used to re-inject retried jobs.
const DLQ_RETRY_CLIENT_ID: &str = "dlq-retry";

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct DlqIndex {
    by_id: HashMap<String, JobEnvelope>,
    by_vendor: HashMap<String, Vec<String>>,
}

/// In-memory view of every dead-lettered job.
///
/// Durability lives in the broker: the subscriber session is persistent under
/// a fixed client id, so after a restart the broker redelivers everything not
/// yet acknowledged and the index rebuilds itself. Messages are acknowledged
/// only after they are indexed.
pub struct DlqManager {
    settings: MqttSettings,
    index: Mutex<DlqIndex>,
}

impl DlqManager {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            index: Mutex::new(DlqIndex::default()),
        }
    }

    /// Spawn the background subscriber. Reconnects 5 s after any transport
    /// loss; redelivered duplicates are absorbed by the index.
    pub fn start(self: &std::sync::Arc<Self>) -> JoinHandle<()> {
        let manager = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            info!("DLQ manager iniciado");
            loop {
                if let Err(e) = manager.subscribe_session().await {
                    warn!(
                        error = %e,
                        retry_s = RECONNECT_INTERVAL.as_secs(),
                        "Suscriptor DLQ desconectado, reconectando"
                    );
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        })
    }

    async fn subscribe_session(&self) -> Result<(), MqError> {
        let (client, mut stream) =
            MqttClient::connect_consumer(&self.settings, DLQ_MANAGER_CLIENT_ID, true).await?;
        client.subscribe(&client.topics().dlq_wildcard()).await?;

        while let Some(inbound) = stream.recv().await {
            let Some(vendor) = client.topics().vendor_from_topic(&inbound.topic) else {
                warn!(topic = %inbound.topic, "Topic DLQ sin aseguradora, ignorado");
                let _ = client.ack(&inbound).await;
                continue;
            };
            let vendor = vendor.to_string();
            self.insert(&vendor, inbound.envelope.clone()).await;
            // Ack only once indexed, so a crash between delivery and index
            // leaves the message pending on the broker.
            if let Err(e) = client.ack(&inbound).await {
                warn!(error = %e, "Error confirmando mensaje DLQ");
            }
        }

        Err(MqError::Connection("stream DLQ cerrado".into()))
    }

    /// Index one dead-lettered envelope. Duplicate job ids within a vendor
    /// (broker redelivery) collapse into a single entry.
    pub async fn insert(&self, vendor: &str, envelope: JobEnvelope) {
        let vendor = vendor.to_lowercase();
        let mut index = self.index.lock().await;
        let ids = index.by_vendor.entry(vendor.clone()).or_default();
        if !ids.contains(&envelope.job_id) {
            ids.push(envelope.job_id.clone());
        }
        info!(
            job_id = %envelope.job_id,
            vendor = %vendor,
            retry_count = envelope.retry_count,
            "Mensaje DLQ almacenado"
        );
        index.by_id.insert(envelope.job_id.clone(), envelope);
    }

    /// Snapshot of every indexed envelope, grouped by vendor in stable order.
    pub async fn list_all(&self) -> Vec<JobEnvelope> {
        let index = self.index.lock().await;
        let mut vendors: Vec<&String> = index.by_vendor.keys().collect();
        vendors.sort();
        vendors
            .into_iter()
            .flat_map(|vendor| index.by_vendor[vendor].iter())
            .filter_map(|job_id| index.by_id.get(job_id).cloned())
            .collect()
    }

    /// Ordered envelopes for one vendor.
    pub async fn list_by_vendor(&self, vendor: &str) -> Vec<JobEnvelope> {
        let vendor = vendor.to_lowercase();
        let index = self.index.lock().await;
        index
            .by_vendor
            .get(&vendor)
            .map(|ids| {
                ids.iter()
                    .filter_map(|job_id| index.by_id.get(job_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn get(&self, job_id: &str) -> Option<JobEnvelope> {
        self.index.lock().await.by_id.get(job_id).cloned()
    }

    /// Re-inject a dead-lettered job into its origin queue.
    ///
    /// The republished envelope restarts its retry chain (`retry_count=0`,
    /// empty history) while keeping `job_id` and `payload`. Returns
    /// `Ok(false)` when the job is not indexed; a publish failure leaves the
    /// index untouched.
    pub async fn retry(&self, job_id: &str) -> Result<bool, MqError> {
        let (vendor, mut envelope) = {
            let index = self.index.lock().await;
            let Some(envelope) = index.by_id.get(job_id) else {
                warn!(job_id = %job_id, "Mensaje DLQ no encontrado");
                return Ok(false);
            };
            let Some(vendor) = index
                .by_vendor
                .iter()
                .find(|(_, ids)| ids.iter().any(|id| id == job_id))
                .map(|(vendor, _)| vendor.clone())
            else {
                error!(job_id = %job_id, "Aseguradora desconocida para mensaje DLQ");
                return Ok(false);
            };
            (vendor, envelope.clone())
        };

        envelope.reset_for_retry();

        let client = MqttClient::connect_publisher(&self.settings, DLQ_RETRY_CLIENT_ID).await?;
        let published = client.publish_job(&vendor, &envelope).await;
        client.disconnect().await;
        published?;

        let mut index = self.index.lock().await;
        index.by_id.remove(job_id);
        if let Some(ids) = index.by_vendor.get_mut(&vendor) {
            ids.retain(|id| id != job_id);
        }
        let queue = TopicScheme::new(&self.settings.topic_prefix).queue(&vendor);
        info!(job_id = %job_id, topic = %queue, "Mensaje DLQ reencolado");
        Ok(true)
    }

    pub async fn count(&self) -> usize {
        self.index.lock().await.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn manager() -> DlqManager {
        DlqManager::new(MqttSettings::default())
    }

    fn envelope(job_id: &str) -> JobEnvelope {
        JobEnvelope::new(job_id, Map::new())
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let dlq = manager();
        dlq.insert("hdi", envelope("j1")).await;
        dlq.insert("hdi", envelope("j2")).await;
        dlq.insert("sbs", envelope("j3")).await;

        assert_eq!(dlq.count().await, 3);
        assert_eq!(dlq.list_all().await.len(), 3);

        let hdi = dlq.list_by_vendor("hdi").await;
        assert_eq!(hdi.len(), 2);
        assert_eq!(hdi[0].job_id, "j1");
        assert_eq!(hdi[1].job_id, "j2");
        assert!(dlq.list_by_vendor("axa").await.is_empty());
    }

    #[tokio::test]
    async fn test_vendor_lookup_is_case_insensitive() {
        let dlq = manager();
        dlq.insert("HDI", envelope("j1")).await;
        assert_eq!(dlq.list_by_vendor("hdi").await.len(), 1);
        assert_eq!(dlq.list_by_vendor("Hdi").await.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_duplicates_are_absorbed() {
        let dlq = manager();
        dlq.insert("hdi", envelope("j1")).await;
        dlq.insert("hdi", envelope("j1")).await;

        assert_eq!(dlq.count().await, 1);
        assert_eq!(dlq.list_by_vendor("hdi").await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_unknown_job_is_false() {
        let dlq = manager();
        assert!(!dlq.retry("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_returns_stored_envelope() {
        let dlq = manager();
        let mut env = envelope("j1");
        env.retry_count = 3;
        dlq.insert("sura", env).await;

        let stored = dlq.get("j1").await.unwrap();
        assert_eq!(stored.retry_count, 3);
        assert!(dlq.get("j2").await.is_none());
    }
}
