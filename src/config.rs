//! Configuration handling for the PiVPN reporter
//!
//! Settings come from three layers, highest priority first: command-line
//! flags (or their environment variables), a TOML config file, and built-in
//! defaults.

use crate::backend::Backend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const LOCAL_CONFIG: &str = "pivpn-reporter.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between reconciliation cycles
    pub update_interval: u64,
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub vpn: VpnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub client_id: String,
    /// Keep-alive in seconds
    pub keep_alive: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub discovery_prefix: String,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    pub backend: Backend,
    /// Program (plus leading arguments) used to query PiVPN
    pub command: String,
    /// Per-invocation timeout in seconds
    pub timeout: u64,
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub discovery_topic_prefix: Option<String>,
    pub topic_prefix: Option<String>,
    pub update_interval: Option<u64>,
    pub vpn_type: Option<Backend>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval: 300,
            mqtt: MqttConfig::default(),
            topics: TopicConfig::default(),
            vpn: VpnConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "homeassistant.local".to_string(),
            port: 1883,
            user: "mqttuser".to_string(),
            password: "changeme".to_string(),
            client_id: default_client_id(),
            keep_alive: 60,
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant/sensor/pivpn".to_string(),
            topic_prefix: "home/nodes/sensor/pivpn".to_string(),
        }
    }
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            backend: Backend::WireGuard,
            command: "pivpn".to_string(),
            timeout: 10,
        }
    }
}

fn default_client_id() -> String {
    match hostname::get() {
        Ok(name) => format!("pivpn-reporter-{}", name.to_string_lossy()),
        Err(_) => "pivpn-reporter".to_string(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from an explicit path, or from the default locations
    ///
    /// Falls back to `./pivpn-reporter.toml`, then
    /// `~/.pivpn-reporter/config.toml`, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Self::load(&local_config);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".pivpn-reporter").join("config.toml");
            if home_config.exists() {
                return Self::load(&home_config);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply command-line / environment overrides on top of this config
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.mqtt_host {
            self.mqtt.host = host;
        }
        if let Some(port) = overrides.mqtt_port {
            self.mqtt.port = port;
        }
        if let Some(user) = overrides.mqtt_user {
            self.mqtt.user = user;
        }
        if let Some(password) = overrides.mqtt_password {
            self.mqtt.password = password;
        }
        if let Some(prefix) = overrides.discovery_topic_prefix {
            self.topics.discovery_prefix = prefix;
        }
        if let Some(prefix) = overrides.topic_prefix {
            self.topics.topic_prefix = prefix;
        }
        if let Some(interval) = overrides.update_interval {
            self.update_interval = interval;
        }
        if let Some(backend) = overrides.vpn_type {
            self.vpn.backend = backend;
        }
    }

    /// Strip trailing slashes from the prefixes and reject unusable values
    pub fn normalize(mut self) -> Result<Self, ConfigError> {
        self.topics.discovery_prefix = trim_slash(&self.topics.discovery_prefix);
        self.topics.topic_prefix = trim_slash(&self.topics.topic_prefix);

        if self.update_interval == 0 {
            return Err(ConfigError::Invalid(
                "update_interval must be at least 1 second".to_string(),
            ));
        }
        if self.vpn.timeout == 0 {
            return Err(ConfigError::Invalid(
                "vpn.timeout must be at least 1 second".to_string(),
            ));
        }
        if self.mqtt.keep_alive < 5 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive must be at least 5 seconds".to_string(),
            ));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host is empty".to_string()));
        }
        if self.vpn.command.trim().is_empty() {
            return Err(ConfigError::Invalid("vpn.command is empty".to_string()));
        }

        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.vpn.timeout)
    }
}

fn trim_slash(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}
