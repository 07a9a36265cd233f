// src/utils/config.rs
//! Layered configuration
//!
//! Values come from serde defaults, then an optional config file, then
//! `MQTT_BAG__*` environment variables. Command-line flags are applied last
//! by the launcher through [`BagConfig::apply_cli`].

use crate::utils::errors::{BagError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MQTT_BAG";

/// Complete configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BagConfig {
    pub broker: BrokerConfig,
    pub recorder: RecorderConfig,
    pub player: PlayerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Broker connection settings
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,

    /// Client ids are `<prefix>-<32 random letters>`
    pub client_id_prefix: String,

    pub keep_alive_secs: u64,

    /// Upper bound for the initial CONNECT/CONNACK exchange
    pub connect_timeout_secs: u64,

    /// QoS used for subscriptions and publishes (0, 1 or 2)
    pub qos: u8,

    /// Largest packet accepted or sent, in bytes
    pub max_packet_size: usize,

    /// Request channel capacity of the MQTT client
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: None,
            password: None,
            client_id_prefix: "MQTT-bag".to_string(),
            keep_alive_secs: 5,
            connect_timeout_secs: 10,
            qos: 0,
            max_packet_size: 16 * 1024 * 1024,
            channel_capacity: 1024,
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id_prefix", &self.client_id_prefix)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("qos", &self.qos)
            .field("max_packet_size", &self.max_packet_size)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Username and password, only when both are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}

/// Recorder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Capacity of the inbound event channel
    pub queue_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
        }
    }
}

/// Player settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Length of one cancellable wait slice (milliseconds)
    pub poll_interval_ms: u64,

    /// Minimum spacing between progress lines (milliseconds)
    pub progress_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            progress_interval_ms: 1000,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Metrics exporter settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint; no exporter when unset
    pub listen: Option<SocketAddr>,
}

/// Command-line values that override configuration
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl BagConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(BagError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<BagConfig>()?;

        config.validate()?;
        debug!("Configuration loaded: {:?}", config);

        Ok(config)
    }

    /// Apply command-line overrides
    pub fn apply_cli(&mut self, overrides: CliOverrides) {
        if let Some(host) = overrides.host {
            self.broker.host = host;
        }
        if let Some(port) = overrides.port {
            self.broker.port = port;
        }
        if overrides.user.is_some() {
            self.broker.user = overrides.user;
        }
        if overrides.password.is_some() {
            self.broker.password = overrides.password;
        }
    }

    /// Reject values the rest of the crate cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.broker.qos > 2 {
            return Err(BagError::Config(format!(
                "broker.qos must be 0, 1 or 2, got {}",
                self.broker.qos
            )));
        }
        if self.player.poll_interval_ms == 0 {
            return Err(BagError::Config(
                "player.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.recorder.queue_capacity == 0 || self.broker.channel_capacity == 0 {
            return Err(BagError::Config(
                "queue capacities must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = BagConfig::default();
        assert_eq!(config.broker.host, "127.0.0.1");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.player.poll_interval_ms, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[broker]\nhost = \"broker.local\"\nport = 1884\n\n[player]\npoll_interval_ms = 5"
        )
        .unwrap();

        let config = BagConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 1884);
        assert_eq!(config.player.poll_interval_ms, 5);
        assert_eq!(config.recorder.queue_capacity, 4096);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = BagConfig::load(Some(Path::new("/nonexistent/mqtt-bag.toml")));
        assert!(matches!(result, Err(BagError::Config(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = BagConfig::default();
        config.apply_cli(CliOverrides {
            host: Some("10.0.0.2".to_string()),
            port: Some(8883),
            user: Some("alice".to_string()),
            password: None,
        });

        assert_eq!(config.broker.host, "10.0.0.2");
        assert_eq!(config.broker.port, 8883);
        assert!(config.broker.credentials().is_none());
    }

    #[test]
    fn test_invalid_qos() {
        let mut config = BagConfig::default();
        config.broker.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_redacted() {
        let mut config = BrokerConfig::default();
        config.password = Some("hunter2".to_string());
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
