use serde::Deserialize;

/// Shared MQTT broker settings used by every process.
#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    /// Broker hostname. Default: "localhost".
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port. Default: 1883.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base client identifier. Publishers derive fixed ids from it;
    /// workers override it with their own stable id.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Publish/subscribe QoS (0, 1 or 2). Default: 1.
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Prefix for every topic. Default: "bots".
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Keepalive interval in seconds. Default: 60.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "cotizador".into()
}
fn default_qos() -> u8 {
    1
}
fn default_topic_prefix() -> String {
    "bots".into()
}
fn default_keepalive_secs() -> u64 {
    60
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            qos: default_qos(),
            topic_prefix: default_topic_prefix(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Process-wide settings shared by the API and the workers.
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralSettings {
    /// development, staging or production. Production gates whether handler
    /// errors are reported to the external web app.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Global log level: DEBUG, INFO, WARNING or ERROR.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_environment() -> String {
    "development".into()
}
fn default_log_level() -> String {
    "INFO".into()
}

impl GeneralSettings {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Configured level mapped onto `tracing`. `WARNING` is the documented
    /// spelling and translates to `WARN`; unrecognized values fall back to
    /// INFO.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARNING" | "WARN" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            other => {
                eprintln!("log_level '{}' no reconocido, usando INFO", other);
                tracing::Level::INFO
            }
        }
    }
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
        }
    }
}

/// Default retry budget settings shared by ingress and workers.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    /// Envelope default for `max_retries`. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}
