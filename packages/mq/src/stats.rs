use std::time::Duration;

use common::config::MqttSettings;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, Event, MqttOptions};
use tracing::{debug, warn};
use uuid::Uuid;

/// Best-effort reader of Mosquitto `$SYS` broker statistics.
///
/// Every call opens a short-lived ephemeral connection; unavailable or
/// non-numeric values come back as the `-1` sentinel so callers never block
/// on a sick broker.
#[derive(Debug, Clone)]
pub struct BrokerStatsClient {
    host: String,
    port: u16,
}

impl BrokerStatsClient {
    pub fn new(settings: &MqttSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }

    /// Stored message count from `$SYS/broker/messages/stored`, or -1.
    pub async fn queue_depth(&self, timeout: Duration) -> i64 {
        self.read_sys_counter("$SYS/broker/messages/stored", timeout)
            .await
    }

    /// Connected client count from `$SYS/broker/clients/connected`, or -1.
    pub async fn connected_clients(&self, timeout: Duration) -> i64 {
        self.read_sys_counter("$SYS/broker/clients/connected", timeout)
            .await
    }

    /// True when the broker accepts a connection before the timeout.
    pub async fn is_broker_healthy(&self, timeout: Duration) -> bool {
        let (client, mut eventloop) = self.ephemeral_client("health-check");

        let wait_connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return true,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Broker health check falló");
                        return false;
                    }
                }
            }
        };

        let healthy = tokio::time::timeout(timeout, wait_connack)
            .await
            .unwrap_or_else(|_| {
                warn!(timeout_s = timeout.as_secs_f64(), "Broker health check timeout");
                false
            });
        let _ = client.disconnect().await;
        healthy
    }

    async fn read_sys_counter(&self, topic: &str, timeout: Duration) -> i64 {
        let (client, mut eventloop) = self.ephemeral_client("stats-client");

        let read = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if client.subscribe(topic, QoS::AtMostOnce).await.is_err() {
                            return None;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let received = String::from_utf8_lossy(&publish.topic).to_string();
                        if received == topic {
                            let raw = String::from_utf8_lossy(&publish.payload).to_string();
                            return raw.trim().parse::<i64>().ok();
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Error consultando $SYS");
                        return None;
                    }
                }
            }
        };

        let value = tokio::time::timeout(timeout, read)
            .await
            .ok()
            .flatten()
            .unwrap_or(-1);
        let _ = client.disconnect().await;
        value
    }

    fn ephemeral_client(
        &self,
        purpose: &str,
    ) -> (AsyncClient, rumqttc::v5::EventLoop) {
        let suffix = Uuid::new_v4().simple().to_string();
        let client_id = format!("{}-{}", purpose, &suffix[..8]);
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(10));
        options.set_clean_start(true);
        AsyncClient::new(options, 10)
    }
}
