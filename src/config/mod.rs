use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub discovery: DiscoveryConfig,
    pub mqtt: MqttConfig,
    pub stream: StreamConfig,
    pub recording: RecordingConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// mDNS service type announced by camera nodes.
    pub service_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_seconds: u64,
    pub tls: bool,
    /// CA bundle for the broker's (possibly self-signed) certificate.
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Connect attempts before an actor halts permanently.
    pub max_connect_retries: u32,
    /// Consecutive read failures before a connection is dropped.
    pub max_read_failures: u32,
    /// How long shutdown waits for each actor before proceeding anyway.
    pub actor_join_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory recordings are spooled to while in progress.
    pub spool_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Single shared secret; when set, per-service credentials are derived
    /// from it and the static pairs below are ignored.
    pub secret: String,
    pub rtsp_username: String,
    pub rtsp_password: String,
    pub mqtt_username: String,
    pub mqtt_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            discovery: DiscoveryConfig::default(),
            mqtt: MqttConfig::default(),
            stream: StreamConfig::default(),
            recording: RecordingConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Fleet Command".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "_fleet-node._tcp.local.".to_string(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 8883,
            client_id: "fleet_command_center".to_string(),
            keep_alive_seconds: 60,
            tls: true,
            ca_file: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_connect_retries: 60,
            max_read_failures: 30,
            actor_join_timeout_seconds: 2,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            spool_dir: std::env::temp_dir(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            rtsp_username: "fleet".to_string(),
            rtsp_password: "fleet".to_string(),
            mqtt_username: "fleet".to_string(),
            mqtt_password: "fleet".to_string(),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.discovery.service_type.is_empty() {
            return Err("discovery service_type must not be empty".to_string());
        }
        if self.mqtt.broker.is_empty() {
            return Err("mqtt broker must not be empty".to_string());
        }
        if self.mqtt.port == 0 {
            return Err("mqtt port must be greater than 0".to_string());
        }
        if self.stream.max_connect_retries == 0 {
            return Err("max_connect_retries must be greater than 0".to_string());
        }
        if self.stream.max_read_failures == 0 {
            return Err("max_read_failures must be greater than 0".to_string());
        }
        Ok(())
    }

    pub async fn from_file(path: &PathBuf) -> crate::Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::FleetError::ConfigError(format!(
                "Failed to read configuration file {:?}: {}",
                path, e
            ))
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| {
            crate::FleetError::ConfigError(format!(
                "Failed to parse configuration file {:?}: {}",
                path, e
            ))
        })?;

        config.apply_env_overrides();
        config.validate().map_err(crate::FleetError::ConfigError)?;
        Ok(config)
    }

    /// Load from file when it exists, otherwise fall back to defaults.
    pub async fn load_or_default(path: &PathBuf) -> crate::Result<Self> {
        if path.exists() {
            Self::from_file(path).await
        } else {
            info!("Configuration file {:?} not found, using defaults", path);
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Secrets can come from the environment so they never have to live in
    /// the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("FLEET_SECRET") {
            self.security.secret = secret;
        }
        if let Ok(user) = std::env::var("FLEET_RTSP_USERNAME") {
            self.security.rtsp_username = user;
        }
        if let Ok(pass) = std::env::var("FLEET_RTSP_PASSWORD") {
            self.security.rtsp_password = pass;
        }
        if let Ok(user) = std::env::var("FLEET_MQTT_USERNAME") {
            self.security.mqtt_username = user;
        }
        if let Ok(pass) = std::env::var("FLEET_MQTT_PASSWORD") {
            self.security.mqtt_password = pass;
        }
        if let Ok(broker) = std::env::var("FLEET_MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
    }
}
