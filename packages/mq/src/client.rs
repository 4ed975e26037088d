use std::sync::Arc;
use std::time::Duration;

use common::config::MqttSettings;
use common::envelope::{JobEnvelope, now_iso};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::{ConnectProperties, LastWill, Packet, Publish};
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::MqError;
use crate::topics::TopicScheme;

/// How long to wait for the first CONNACK before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff between reconnect attempts of a resilient publisher pump.
const PUMP_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the inbound message channel.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// A decoded message from a subscribed topic.
///
/// Holds the raw packet so the consumer can acknowledge only after the
/// handler finished; unacked QoS-1 messages are redelivered by the broker.
#[derive(Debug)]
pub struct Inbound {
    pub topic: String,
    pub envelope: JobEnvelope,
    packet: Publish,
}

/// Stream of inbound messages. `recv` returning `None` means the transport
/// was lost and the caller must reconnect.
pub struct MessageStream {
    rx: mpsc::Receiver<Inbound>,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

/// How the event-loop pump reacts to a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpMode {
    /// Keep polling through errors; used by long-lived publishers.
    Resilient,
    /// End the stream on the first error so the owner can reconnect and
    /// restore subscriptions; used by consumers.
    FailFast,
}

/// Async MQTT client.
///
/// Two session modes: *ephemeral* (clean start; publishers, the DLQ retry
/// injector) and *persistent* (stable client id + session kept broker-side;
/// workers, the DLQ subscriber) so QoS-1 messages survive disconnects.
///
/// Every client announces itself on the retained status topic and leaves a
/// retained `offline` Last-Will behind.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    client_id: String,
    qos: QoS,
    topics: TopicScheme,
    connected: Arc<watch::Sender<bool>>,
}

impl MqttClient {
    /// Connect a publish-only client with an ephemeral session.
    ///
    /// The pump keeps polling through broker outages; `connected()` and
    /// `ping()` report the live state.
    pub async fn connect_publisher(
        settings: &MqttSettings,
        client_id: &str,
    ) -> Result<Self, MqError> {
        Self::connect_inner(settings, client_id, false, PumpMode::Resilient, None).await
    }

    /// Connect a consuming client. `persistent` keeps the broker session
    /// alive across disconnects, which requires a stable `client_id`.
    ///
    /// Inbound QoS-1 messages are only acknowledged via [`MqttClient::ack`].
    pub async fn connect_consumer(
        settings: &MqttSettings,
        client_id: &str,
        persistent: bool,
    ) -> Result<(Self, MessageStream), MqError> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let client =
            Self::connect_inner(settings, client_id, persistent, PumpMode::FailFast, Some(tx))
                .await?;
        Ok((client, MessageStream { rx }))
    }

    async fn connect_inner(
        settings: &MqttSettings,
        client_id: &str,
        persistent: bool,
        mode: PumpMode,
        inbound_tx: Option<mpsc::Sender<Inbound>>,
    ) -> Result<Self, MqError> {
        let topics = TopicScheme::new(&settings.topic_prefix);
        let qos = qos_from(settings.qos);

        let mut options = MqttOptions::new(client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keepalive_secs));
        options.set_clean_start(!persistent);
        if persistent {
            let mut connect_properties = ConnectProperties::new();
            connect_properties.session_expiry_interval = Some(u32::MAX);
            options.set_connect_properties(connect_properties);
        }
        if inbound_tx.is_some() {
            options.set_manual_acks(true);
        }
        options.set_last_will(LastWill::new(
            topics.status(),
            status_payload(client_id, "offline"),
            qos,
            true,
            None,
        ));

        let (client, eventloop) = AsyncClient::new(options, 64);

        let (connected_tx, _) = watch::channel(false);
        let connected = Arc::new(connected_tx);
        spawn_pump(
            eventloop,
            mode,
            Arc::clone(&connected),
            inbound_tx,
            client_id.to_string(),
        );

        let mut rx = connected.subscribe();
        match tokio::time::timeout(CONNECT_TIMEOUT, rx.wait_for(|up| *up)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                return Err(MqError::Connection(
                    "connection task ended before CONNACK".into(),
                ));
            }
            Err(_) => return Err(MqError::Timeout(CONNECT_TIMEOUT)),
        }

        let me = Self {
            client,
            client_id: client_id.to_string(),
            qos,
            topics,
            connected,
        };

        me.publish_status("online").await;
        info!(
            client_id = %me.client_id,
            host = %settings.host,
            port = settings.port,
            persistent,
            "Conectado a MQTT"
        );
        Ok(me)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Publish a job envelope to a vendor's work queue at the configured QoS.
    pub async fn publish_job(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
        let topic = self.topics.queue(vendor);
        self.publish(&topic, envelope.to_json(), false).await?;
        info!(topic = %topic, job_id = %envelope.job_id, "Tarea publicada");
        Ok(())
    }

    /// Publish a job envelope to a vendor's dead-letter topic, non-retained.
    pub async fn publish_dlq(&self, vendor: &str, envelope: &JobEnvelope) -> Result<(), MqError> {
        let topic = self.topics.dlq(vendor);
        self.publish(&topic, envelope.to_json(), false).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), MqError> {
        if !self.connected() {
            return Err(MqError::NotConnected);
        }
        self.client
            .publish(topic, self.qos, retain, payload)
            .await
            .map_err(|e| MqError::Publish(e.to_string()))
    }

    /// Subscribe to an exact topic or wildcard at the configured QoS.
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqError> {
        self.client
            .subscribe(topic, self.qos)
            .await
            .map_err(|e| MqError::Subscribe(e.to_string()))?;
        info!(topic = %topic, "Suscrito");
        Ok(())
    }

    /// Shared subscription over one vendor queue (or all of them) so that
    /// each message reaches exactly one worker within `group`.
    pub async fn subscribe_shared(
        &self,
        group: &str,
        vendor: Option<&str>,
    ) -> Result<(), MqError> {
        let base = match vendor {
            Some(v) => self.topics.queue(v),
            None => self.topics.queue_wildcard(),
        };
        self.subscribe(&self.topics.shared(group, &base)).await
    }

    /// Acknowledge a consumed message after its handler finished.
    pub async fn ack(&self, message: &Inbound) -> Result<(), MqError> {
        self.client
            .ack(&message.packet)
            .await
            .map_err(|e| MqError::Ack(e.to_string()))
    }

    /// Probe broker liveness by publishing a QoS-0 heartbeat.
    ///
    /// Returns `false` on timeout or transport error and flips the connected
    /// flag so the next health check reports degraded immediately.
    pub async fn ping(&self, timeout: Duration) -> bool {
        if !self.connected() {
            return false;
        }
        let payload = json!({
            "client_id": self.client_id,
            "timestamp": now_iso(),
            "type": "ping",
        })
        .to_string();

        let publish =
            self.client
                .publish(self.topics.heartbeat(), QoS::AtMostOnce, false, payload);
        match tokio::time::timeout(timeout, publish).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Error verificando conexión MQTT");
                self.connected.send_replace(false);
                false
            }
            Err(_) => {
                warn!(timeout_s = timeout.as_secs_f64(), "Timeout verificando conexión MQTT");
                self.connected.send_replace(false);
                false
            }
        }
    }

    /// Publish the retained offline status and close the connection.
    pub async fn disconnect(&self) {
        self.publish_status("offline").await;
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Error desconectando de MQTT");
        }
        self.connected.send_replace(false);
    }

    async fn publish_status(&self, status: &str) {
        let result = self
            .client
            .publish(
                self.topics.status(),
                self.qos,
                true,
                status_payload(&self.client_id, status),
            )
            .await;
        if let Err(e) = result {
            warn!(status = %status, error = %e, "Error publicando estado del cliente");
        }
    }
}

fn status_payload(client_id: &str, status: &str) -> String {
    json!({
        "client_id": client_id,
        "status": status,
        "timestamp": now_iso(),
    })
    .to_string()
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Drives the rumqttc event loop, maintains the connected flag and feeds
/// decoded inbound messages into the bounded channel. Decode failures are
/// logged and skipped; they never end the stream.
fn spawn_pump(
    mut eventloop: EventLoop,
    mode: PumpMode,
    connected: Arc<watch::Sender<bool>>,
    inbound_tx: Option<mpsc::Sender<Inbound>>,
    client_id: String,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    debug!(client_id = %client_id, "CONNACK recibido");
                    connected.send_replace(true);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(tx) = &inbound_tx else { continue };
                    let topic = String::from_utf8_lossy(&publish.topic).to_string();
                    match JobEnvelope::from_json(&publish.payload) {
                        Ok(envelope) => {
                            debug!(topic = %topic, job_id = %envelope.job_id, "Mensaje recibido");
                            let inbound = Inbound {
                                topic,
                                envelope,
                                packet: publish,
                            };
                            if tx.send(inbound).await.is_err() {
                                // Receiver dropped; the owner is gone.
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(topic = %topic, error = %e, "JSON inválido en mensaje, descartado");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect(_))) => {
                    warn!(client_id = %client_id, "Desconexión solicitada por el broker");
                    connected.send_replace(false);
                    if mode == PumpMode::FailFast {
                        break;
                    }
                }
                Ok(_) => {}
                // Every client handle was dropped; nothing left to drive.
                Err(ConnectionError::RequestsDone) => {
                    debug!(client_id = %client_id, "Cliente MQTT liberado");
                    break;
                }
                Err(e) => {
                    connected.send_replace(false);
                    match mode {
                        PumpMode::FailFast => {
                            warn!(client_id = %client_id, error = %e, "Conexión MQTT perdida");
                            break;
                        }
                        PumpMode::Resilient => {
                            warn!(
                                client_id = %client_id,
                                error = %e,
                                retry_s = PUMP_RETRY_INTERVAL.as_secs(),
                                "Conexión MQTT perdida, reintentando"
                            );
                            tokio::time::sleep(PUMP_RETRY_INTERVAL).await;
                        }
                    }
                }
            }
        }
        connected.send_replace(false);
    });
}
