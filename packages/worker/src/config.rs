use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{GeneralSettings, MqttSettings, RetrySettings};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Stable identifier for this worker instance. Persistent broker sessions
    /// are keyed by it, so two processes must never share one. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Pin this worker to a single vendor queue. Unset means omnivore
    /// (`bots/queue/+`).
    #[serde(default)]
    pub vendor: Option<String>,
    /// Shared-subscription group. Default: "workers", or "workers-<vendor>"
    /// for a pinned worker.
    #[serde(default)]
    pub group: Option<String>,
    /// Concurrent handler slots. Default: 3.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// CPU threshold above which new jobs are rejected. Default: 85.
    #[serde(default = "default_max_cpu_pct")]
    pub max_cpu_pct: f32,
    /// Memory-used threshold above which new jobs are rejected. Default: 85.
    #[serde(default = "default_max_mem_pct")]
    pub max_mem_pct: f32,
    /// Upper bound for one handler run, in seconds. Default: 300.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Backoff between reconnect attempts, in seconds. Default: 5.
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
    /// Grace period for draining in-flight jobs on shutdown. Default: 30.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Activity log consumed by the API metrics collector.
    #[serde(default = "default_activity_log")]
    pub activity_log: String,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_max_concurrent() -> usize {
    3
}
fn default_max_cpu_pct() -> f32 {
    85.0
}
fn default_max_mem_pct() -> f32 {
    85.0
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_reconnect_secs() -> u64 {
    5
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_activity_log() -> String {
    "logs/worker.log".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            vendor: None,
            group: None,
            max_concurrent: default_max_concurrent(),
            max_cpu_pct: default_max_cpu_pct(),
            max_mem_pct: default_max_mem_pct(),
            timeout_secs: default_timeout_secs(),
            reconnect_secs: default_reconnect_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            activity_log: default_activity_log(),
        }
    }
}

impl WorkerConfig {
    /// Effective shared-subscription group for this worker.
    pub fn effective_group(&self) -> String {
        if let Some(group) = &self.group {
            return group.clone();
        }
        match &self.vendor {
            Some(vendor) => format!("workers-{}", vendor),
            None => "workers".to_string(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("COTIZADOR_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("worker.id", "worker-1")?
            .set_default("worker.max_concurrent", 3_i64)?
            .set_default("worker.timeout_secs", 300_i64)?
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.port", 1883_i64)?
            .set_default("mqtt.topic_prefix", "bots")?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("COTIZADOR").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
