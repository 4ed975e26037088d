use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use worker::config::WorkerAppConfig;
use worker::handler::HandlerRegistry;
use worker::janitor::Janitor;
use worker::runtime::WorkerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerAppConfig::load().context("Failed to load config")?;

    tracing_subscriber::fmt()
        .with_max_level(config.general.tracing_level())
        .with_target(false)
        .init();

    info!(
        worker_id = %config.worker.id,
        group = %config.worker.effective_group(),
        vendor = config.worker.vendor.as_deref().unwrap_or("*"),
        "Worker iniciando"
    );

    // Composition root: vendor drivers register their factories here.
    let registry = HandlerRegistry::new();
    if registry.is_empty() {
        warn!("Ningún bot registrado, los mensajes entrantes serán descartados");
    } else {
        let vendors: Vec<&str> = registry.vendors().iter().map(|v| v.as_str()).collect();
        info!(bots = ?vendors, "Bots registrados");
    }

    let janitor_task = Janitor::new("logs/bots", "temp/pdfs").start();

    let grace = Duration::from_secs(config.worker.shutdown_grace_secs + 5);
    let runtime = WorkerRuntime::new(config, registry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { runtime.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Señal de apagado recibida");
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(grace, handle).await.is_err() {
        warn!("El worker no terminó dentro del periodo de gracia");
    }
    janitor_task.abort();

    Ok(())
}
