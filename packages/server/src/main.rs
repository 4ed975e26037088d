use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use mq::{BrokerStatsClient, MqttClient};
use server::config::AppConfig;
use server::dlq::DlqManager;
use server::health::HealthMonitor;
use server::log_parser::LogParser;
use server::metrics::MetricsCollector;
use server::state::{AppState, JobPublisher};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.general.tracing_level())
        .with_target(false)
        .init();

    info!("Iniciando Cotizador API");

    let mqtt_client = MqttClient::connect_publisher(&config.mqtt, &config.publisher_client_id())
        .await
        .context("Failed to connect to MQTT broker")?;
    let publisher: Arc<dyn JobPublisher> = Arc::new(mqtt_client.clone());

    let dlq = Arc::new(DlqManager::new(config.mqtt.clone()));
    let dlq_task = dlq.start();

    let health = Arc::new(HealthMonitor::new(Arc::clone(&publisher)));
    let metrics = Arc::new(MetricsCollector::new(
        BrokerStatsClient::new(&config.mqtt),
        LogParser::new(&config.api.worker_log_path),
    ));

    let state = AppState {
        config: config.clone(),
        publisher,
        dlq,
        health,
        metrics,
    };

    let app = server::build_router(state)?;

    let addr_str = format!("{}:{}", config.api.host, config.api.port);
    let addr: SocketAddr = addr_str
        .parse()
        .with_context(|| format!("Invalid server address: {}", addr_str))?;

    info!("Servidor escuchando en http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Señal de apagado recibida");
        })
        .await
        .context("Server runtime error")?;

    dlq_task.abort();
    mqtt_client.disconnect().await;
    info!("Cotizador API detenida");

    Ok(())
}
