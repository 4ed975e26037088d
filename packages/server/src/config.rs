use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{GeneralSettings, MqttSettings, RetrySettings};

/// HTTP API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    /// Bind address. Default: "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port. Default: 8000.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required by every endpoint except /health and /metrics.
    #[serde(default = "default_bearer_token")]
    pub bearer_token: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub cors_methods: Vec<String>,
    #[serde(default = "default_cors_headers")]
    pub cors_headers: Vec<String>,
    #[serde(default = "default_cors_allow_credentials")]
    pub cors_allow_credentials: bool,
    /// Worker activity log parsed by the metrics collector.
    #[serde(default = "default_worker_log_path")]
    pub worker_log_path: String,
    /// Informational: how many worker processes the deployment runs.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_bearer_token() -> String {
    "dev-key-change-in-prod".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn default_cors_methods() -> Vec<String> {
    vec!["GET".into(), "POST".into()]
}
fn default_cors_headers() -> Vec<String> {
    vec!["content-type".into(), "authorization".into()]
}
fn default_cors_allow_credentials() -> bool {
    true
}
fn default_worker_log_path() -> String {
    "logs/worker.log".into()
}
fn default_num_workers() -> u32 {
    3
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_token: default_bearer_token(),
            cors_origins: default_cors_origins(),
            cors_methods: default_cors_methods(),
            cors_headers: default_cors_headers(),
            cors_allow_credentials: default_cors_allow_credentials(),
            worker_log_path: default_worker_log_path(),
            num_workers: default_num_workers(),
        }
    }
}

/// API application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("COTIZADOR_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8000_i64)?
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.port", 1883_i64)?
            .set_default("mqtt.topic_prefix", "bots")?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("COTIZADOR").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Fixed client id of the process publisher, e.g. "cotizador-api".
    pub fn publisher_client_id(&self) -> String {
        format!("{}-api", self.mqtt.client_id)
    }
}
