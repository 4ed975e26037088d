use std::collections::HashMap;
use std::time::Duration;

use common::envelope::now_iso;
use mq::BrokerStatsClient;
use serde::Serialize;
use sysinfo::{Disks, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::log_parser::{ActivitySummary, LogParser};

/// Snapshot cache lifetime.
const CACHE_TTL: Duration = Duration::from_secs(30);
/// Bound on each broker-side lookup.
const BROKER_TIMEOUT: Duration = Duration::from_secs(2);
/// Activity window, in hours.
const ACTIVITY_WINDOW_HOURS: i64 = 24;
/// Substring that identifies a worker process command line.
const WORKER_PROCESS_MARKER: &str = "cotizador-worker";

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub api: &'static str,
    pub mqtt: &'static str,
    pub workers_detected: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    /// `$SYS/broker/messages/stored`, or -1 when unavailable.
    pub total_messages: i64,
    /// `$SYS/broker/clients/connected`, or -1 when unavailable.
    pub clients_connected: i64,
    /// Mosquitto exposes no per-topic counts; kept for shape compatibility.
    pub by_vendor: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub chrome_processes: i64,
}

/// Complete system snapshot served by `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub timestamp: String,
    pub services: ServiceStatus,
    pub queue: QueueMetrics,
    pub activity_24h: ActivitySummary,
    pub resources: ResourceMetrics,
    pub errors: HashMap<String, u64>,
}

/// Aggregates broker statistics, log-derived activity and host resources,
/// cached for 30 s so repeated scrapes stay cheap.
pub struct MetricsCollector {
    stats: BrokerStatsClient,
    log_parser: LogParser,
    cache: Mutex<Option<(Instant, SystemMetrics)>>,
    system: Mutex<System>,
}

impl MetricsCollector {
    pub fn new(stats: BrokerStatsClient, log_parser: LogParser) -> Self {
        Self {
            stats,
            log_parser,
            cache: Mutex::new(None),
            system: Mutex::new(System::new()),
        }
    }

    pub async fn collect(&self) -> SystemMetrics {
        let mut cache = self.cache.lock().await;
        if let Some((collected_at, metrics)) = cache.as_ref()
            && collected_at.elapsed() < CACHE_TTL
        {
            debug!("Retornando métricas cacheadas");
            return metrics.clone();
        }

        debug!("Recolectando métricas nuevas");
        let metrics = SystemMetrics {
            timestamp: now_iso(),
            services: self.service_status().await,
            queue: self.queue_metrics().await,
            activity_24h: self.log_parser.parse_activity(ACTIVITY_WINDOW_HOURS),
            resources: self.resource_metrics().await,
            errors: self.log_parser.parse_errors(ACTIVITY_WINDOW_HOURS),
        };

        *cache = Some((Instant::now(), metrics.clone()));
        metrics
    }

    async fn service_status(&self) -> ServiceStatus {
        // Reachability of this endpoint implies the API itself is healthy.
        let mqtt_healthy = self.stats.is_broker_healthy(BROKER_TIMEOUT).await;
        let workers_detected = self
            .count_processes(|name, cmdline| {
                name.contains(WORKER_PROCESS_MARKER) || cmdline.contains(WORKER_PROCESS_MARKER)
            })
            .await;
        ServiceStatus {
            api: "healthy",
            mqtt: if mqtt_healthy { "healthy" } else { "unhealthy" },
            workers_detected,
        }
    }

    async fn queue_metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_messages: self.stats.queue_depth(BROKER_TIMEOUT).await,
            clients_connected: self.stats.connected_clients(BROKER_TIMEOUT).await,
            by_vendor: HashMap::new(),
        }
    }

    async fn resource_metrics(&self) -> ResourceMetrics {
        let (cpu, memory) = {
            let mut sys = self.system.lock().await;
            sys.refresh_cpu_usage();
            tokio::time::sleep(Duration::from_millis(100)).await;
            sys.refresh_cpu_usage();
            let cpu = sys.global_cpu_usage();
            sys.refresh_memory();
            let total = sys.total_memory();
            let memory = if total > 0 {
                sys.used_memory() as f32 / total as f32 * 100.0
            } else {
                -1.0
            };
            (cpu, memory)
        };

        let chrome = self
            .count_processes(|name, _cmdline| name.contains("chrome") || name.contains("chromium"))
            .await;

        ResourceMetrics {
            cpu_percent: (cpu * 100.0).round() / 100.0,
            memory_percent: (memory * 100.0).round() / 100.0,
            disk_percent: root_disk_percent(),
            chrome_processes: chrome,
        }
    }

    /// Count processes whose lowercase name or command line matches.
    async fn count_processes(&self, matches: impl Fn(&str, &str) -> bool) -> i64 {
        let mut sys = self.system.lock().await;
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let mut count = 0i64;
        for process in sys.processes().values() {
            let name = process.name().to_string_lossy().to_lowercase();
            let cmdline = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().to_lowercase())
                .collect::<Vec<_>>()
                .join(" ");
            if matches(&name, &cmdline) {
                count += 1;
            }
        }
        count
    }
}

/// Used percentage of the root filesystem, or -1 when it cannot be read.
fn root_disk_percent() -> f32 {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().first());

    match root {
        Some(disk) if disk.total_space() > 0 => {
            let used = disk.total_space() - disk.available_space();
            let pct = used as f32 / disk.total_space() as f32 * 100.0;
            (pct * 100.0).round() / 100.0
        }
        _ => -1.0,
    }
}
