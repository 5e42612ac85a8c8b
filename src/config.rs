//! # Agent Configuration
//!
//! Static configuration for the telemetry agent, loaded once from a TOML file at
//! startup and never changed afterwards.
//!
//! ## File Location
//!
//! The path is taken from the `CLIMATE_BEACON_CONFIG` environment variable. Without
//! it the agent falls back to `<config dir>/climate-beacon/agent.toml`, where the
//! config dir is resolved through `dirs` (`~/.config` on Linux).
//!
//! ## Layout
//!
//! ```toml
//! [device]
//! client_id = "sensor01"
//!
//! [wifi]
//! ssid = "greenhouse"
//! password = "secret"
//! interface = "wlan0"
//! backend = "nmcli"        # or "system"
//!
//! [broker]
//! host = "broker.local"
//! port = 1883
//! user = "sensor01"
//! password = "secret"
//! keepalive_secs = 60
//!
//! [topics]
//! base = "greenhouse/sensor01"
//! status = "status"
//! temperature = "temperature"
//! humidity = "humidity"
//!
//! [sensor]
//! kind = "dht22"           # or "fixed"
//! gpio_pin = 4
//!
//! [telemetry]
//! interval_secs = 10
//!
//! [watchdog]
//! device = "/dev/watchdog"
//! ```
//!
//! Every section and field has a default, so a file only needs to carry what
//! differs. [`AgentConfig::validate`] runs after parsing and rejects combinations
//! the agent cannot run with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable overriding the configuration file path
pub const CONFIG_ENV: &str = "CLIMATE_BEACON_CONFIG";

const CONFIG_DIR: &str = "climate-beacon";
const CONFIG_FILE: &str = "agent.toml";

/// Errors raised while loading or validating the configuration.
///
/// All of them are fatal: the agent refuses to start with a configuration it
/// cannot trust.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete agent configuration as read from disk
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub wifi: WifiConfig,
    pub broker: BrokerConfig,
    pub topics: TopicsConfig,
    pub sensor: SensorConfig,
    pub telemetry: TelemetryConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// MQTT client identifier, also embedded in every status message
    pub client_id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: "climate-beacon".to_string(),
        }
    }
}

/// How the wireless link is brought up
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkBackend {
    /// Associate through NetworkManager's `nmcli`
    #[default]
    Nmcli,
    /// The operating system associates on its own; only wait for the link
    System,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    /// Network interface to bring up and watch
    pub interface: String,
    pub backend: LinkBackend,
    /// Delay between two link state polls
    pub poll_interval_ms: u64,
    /// Give up waiting for the link after this many seconds. `None` waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            interface: "wlan0".to_string(),
            backend: LinkBackend::default(),
            poll_interval_ms: 100,
            timeout_secs: None,
        }
    }
}

/// Broker address, credentials and connection policy
#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub keepalive_secs: u64,
    /// Handshake attempts before startup gives up. 1 means no retry.
    pub connect_attempts: u32,
    /// First backoff delay between handshake attempts, doubled after each failure
    pub retry_backoff_secs: u64,
    /// Upper bound for a single handshake or publish flush
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            user: String::new(),
            password: String::new(),
            keepalive_secs: 60,
            connect_attempts: 1,
            retry_backoff_secs: 2,
            timeout_secs: 10,
        }
    }
}

impl fmt::Display for BrokerConfig {
    /// Formats the broker as "user@host:port", leaving the password out.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("keepalive_secs", &self.keepalive_secs)
            .field("connect_attempts", &self.connect_attempts)
            .field("retry_backoff_secs", &self.retry_backoff_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Topic names as written in the file. Use [`TopicsConfig::resolve`] to get
/// the topics the agent actually publishes to.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TopicsConfig {
    /// Optional prefix joined in front of every other topic
    pub base: String,
    pub status: String,
    pub temperature: String,
    pub humidity: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            status: "status".to_string(),
            temperature: "temperature".to_string(),
            humidity: "humidity".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    #[default]
    Dht22,
    /// Constant values, for boards without a sensor attached
    Fixed,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// BCM pin number of the DHT22 data line
    pub gpio_pin: u8,
    pub fixed_temperature: f32,
    pub fixed_humidity: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::default(),
            gpio_pin: 4,
            fixed_temperature: 21.0,
            fixed_humidity: 45.0,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Pause after every iteration, successful or not
    pub interval_secs: u64,
    /// Log a statistics summary every this many iterations (0 disables it)
    pub stats_every: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            stats_every: 60,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Hardware watchdog device. No watchdog is fed when unset.
    pub device: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Identity of this device towards the broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub client_id: String,
}

/// The three topics the agent publishes to, fully resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSet {
    pub status: String,
    pub temperature: String,
    pub humidity: String,
}

impl AgentConfig {
    /// Returns the configuration file path: `CLIMATE_BEACON_CONFIG` if set,
    /// otherwise the per-user config directory.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }

        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Reads, parses and validates the configuration file at `path`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the rest of the agent relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("device.client_id is empty".into()));
        }
        if self.device.client_id.starts_with(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "device.client_id must not start with whitespace".into(),
            ));
        }

        if self.wifi.backend == LinkBackend::Nmcli && self.wifi.ssid.is_empty() {
            return Err(ConfigError::Invalid(
                "wifi.ssid is required with the nmcli backend".into(),
            ));
        }
        if self.wifi.interface.is_empty() {
            return Err(ConfigError::Invalid("wifi.interface is empty".into()));
        }
        if self.wifi.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("wifi.poll_interval_ms must be > 0".into()));
        }

        if self.broker.host.is_empty() {
            return Err(ConfigError::Invalid("broker.host is empty".into()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must be > 0".into()));
        }
        if self.broker.keepalive_secs < 5 {
            return Err(ConfigError::Invalid(
                "broker.keepalive_secs must be at least 5".into(),
            ));
        }
        if self.broker.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "broker.connect_attempts must be at least 1".into(),
            ));
        }
        if self.broker.timeout_secs == 0 {
            return Err(ConfigError::Invalid("broker.timeout_secs must be > 0".into()));
        }

        if self.telemetry.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.interval_secs must be > 0".into(),
            ));
        }
        // Publishing is the only traffic, so it has to keep the connection alive.
        if self.telemetry.interval_secs >= self.broker.keepalive_secs {
            return Err(ConfigError::Invalid(format!(
                "telemetry.interval_secs ({}) must be below broker.keepalive_secs ({})",
                self.telemetry.interval_secs, self.broker.keepalive_secs
            )));
        }

        self.topics.resolve()?;
        self.log_level()?;
        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            client_id: self.device.client_id.clone(),
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.logging.level).map_err(|_| {
            ConfigError::Invalid(format!("unknown logging.level '{}'", self.logging.level))
        })
    }
}

impl TopicsConfig {
    /// Joins `base` in front of each topic and checks the result is publishable.
    pub fn resolve(&self) -> Result<TopicSet, ConfigError> {
        Ok(TopicSet {
            status: self.join("status", &self.status)?,
            temperature: self.join("temperature", &self.temperature)?,
            humidity: self.join("humidity", &self.humidity)?,
        })
    }

    fn join(&self, name: &str, leaf: &str) -> Result<String, ConfigError> {
        if leaf.is_empty() {
            return Err(ConfigError::Invalid(format!("topics.{} is empty", name)));
        }

        let base = self.base.trim_end_matches('/');
        let topic = if base.is_empty() {
            leaf.to_string()
        } else {
            format!("{}/{}", base, leaf)
        };

        if topic.contains(['+', '#', '\0']) {
            return Err(ConfigError::Invalid(format!(
                "topics.{} resolves to '{}', which is not a publishable topic",
                name, topic
            )));
        }
        Ok(topic)
    }
}
