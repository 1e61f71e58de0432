//! Configuration for the poller, bridge and indicator
//!
//! Loaded from TOML; every field has a default so a missing file or a
//! partial file is fine. Example:
//!
//! ```toml
//! [device]
//! vendor_id = 0x4653
//! product_id = 0x0001
//! # Only needed if the keymap does not answer the layer query
//! matrix_rows = 10
//! matrix_cols = 6
//!
//! [bridge]
//! socket_path = "/run/qmk-layer-bridge.sock"
//!
//! [[layers]]
//! name = "Base"
//! color = "#787878"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use via_keyboard::MatrixGeometry;
use via_transport::protocol::layer_value;
use via_transport::DeviceIdentity;

use crate::layer::{default_entries, LayerEntry, LayerTable};

/// Errors from loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// `[device]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    #[serde(flatten)]
    pub identity: DeviceIdentity,
    /// Per-request round trip timeout
    pub request_timeout_ms: u64,
    /// CUSTOM_GET_VALUE channel answering layer queries
    pub layer_channel: u8,
    /// Switch matrix size, for following layers without the layer query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix_rows: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix_cols: Option<u8>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::default(),
            request_timeout_ms: 500,
            layer_channel: layer_value::DEFAULT_CHANNEL,
            matrix_rows: None,
            matrix_cols: None,
        }
    }
}

/// `[poller]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
    /// Switch matrix sample period; short enough to catch layer key taps
    pub matrix_interval_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            matrix_interval_ms: 20,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 1000,
        }
    }
}

/// `[bridge]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket file after binding
    pub socket_mode: u32,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/qmk-dbus-bridge.sock"),
            socket_mode: 0o666,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 5000,
        }
    }
}

/// `[bus]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Well-known bus name of the indicator
    pub name: String,
    pub path: String,
    pub interface: String,
    /// Silence after which `serve-indicator` treats the layer as stale (0 = never)
    pub stale_after_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "com.qmk.LayerIndicator".to_string(),
            path: "/com/qmk/LayerIndicator".to_string(),
            interface: "com.qmk.LayerIndicator".to_string(),
            stale_after_ms: 10_000,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub poller: PollerConfig,
    pub bridge: BridgeConfig,
    pub bus: BusConfig,
    pub layers: Vec<LayerEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            poller: PollerConfig::default(),
            bridge: BridgeConfig::default(),
            bus: BusConfig::default(),
            layers: default_entries(),
        }
    }
}

impl Config {
    /// `~/.config/qmk-layer-bridge/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("qmk-layer-bridge")
            .join("config.toml")
    }

    /// Load and validate config from a file, or return defaults if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("device.request_timeout_ms", self.device.request_timeout_ms),
            ("poller.interval_ms", self.poller.interval_ms),
            ("poller.matrix_interval_ms", self.poller.matrix_interval_ms),
            ("poller.reconnect_initial_ms", self.poller.reconnect_initial_ms),
            ("poller.reconnect_max_ms", self.poller.reconnect_max_ms),
            ("bridge.reconnect_initial_ms", self.bridge.reconnect_initial_ms),
            ("bridge.reconnect_max_ms", self.bridge.reconnect_max_ms),
        ];
        if let Some((key, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be non-zero")));
        }
        match (self.device.matrix_rows, self.device.matrix_cols) {
            (None, None) => {}
            (Some(rows), Some(cols)) if rows > 0 && (1..=32).contains(&cols) => {}
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "device.matrix_rows must be non-zero and device.matrix_cols 1 to 32".into(),
                ))
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "device.matrix_rows and device.matrix_cols must be set together".into(),
                ))
            }
        }
        if self.bridge.socket_mode > 0o777 {
            return Err(ConfigError::Invalid(format!(
                "bridge.socket_mode {:o} is not a permission mode",
                self.bridge.socket_mode
            )));
        }
        if !self.bus.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "bus.path '{}' must start with '/'",
                self.bus.path
            )));
        }
        if self.bus.name.is_empty() || self.bus.interface.is_empty() {
            return Err(ConfigError::Invalid(
                "bus.name and bus.interface must be set".into(),
            ));
        }
        LayerTable::new(self.layers.clone())?;
        Ok(())
    }

    pub fn layer_table(&self) -> Result<LayerTable, ConfigError> {
        LayerTable::new(self.layers.clone())
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn matrix(&self) -> Option<MatrixGeometry> {
        Some(MatrixGeometry::new(self.matrix_rows?, self.matrix_cols?))
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn matrix_interval(&self) -> Duration {
        Duration::from_millis(self.matrix_interval_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl BridgeConfig {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl BusConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_ms > 0).then(|| Duration::from_millis(self.stale_after_ms))
    }
}
