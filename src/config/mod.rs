//! # Configuration Management Module
//!
//! Loads and validates the gateway's TOML configuration. The
//! configuration is organized into logical sections:
//!
//! - [`StationConfig`] - this node's identity on the mesh
//! - [`RadioConfig`] - serial link and LoRa physical-layer parameters
//! - [`GatewayConfig`] - queue draining and retry policy
//! - [`StorageConfig`] - mailbox persistence settings
//! - [`LoggingConfig`] - logging settings
//!
//! All LoRa network parameters (frequency, modulation, CRC header, IQ
//! inversion, sync word, spreading factor, bandwidth) must match across
//! every node on the mesh; node parameters (power, coding rate, watchdog)
//! may vary per station. Ranges are validated on load so a bad value
//! fails at startup instead of mid-sequence on the radio.
//!
//! ## Configuration File Format
//!
//! ```toml
//! [station]
//! id = 1
//!
//! [radio]
//! port = ""              # empty = autodetect the LoStik by USB VID:PID
//! baud_rate = 57600
//! power = 2
//! coding_rate = 5
//! watchdog_timeout_secs = 5
//!
//! [gateway]
//! max_attempts = 3
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// This node's identity on the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station identifier, 1..=99. Stamped into every outbound payload.
    pub id: u8,
}

/// Serial link and LoRa physical-layer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Serial port path. Empty string means autodetect by USB VID:PID.
    pub port: String,
    pub baud_rate: u32,
    /// Exact firmware identification string the radio must report.
    #[serde(default = "default_firmware")]
    pub firmware_version: String,
    /// Serial read timeout in milliseconds. Every read is bounded by this.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    // Network parameters: identical on every node or the mesh fractures.
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    #[serde(default = "default_true")]
    pub crc_header: bool,
    #[serde(default)]
    pub iq_inversion: bool,
    /// Sync word, one hexadecimal byte.
    #[serde(default = "default_sync_word")]
    pub sync_word: String,
    /// Spreading factor, 7..=12.
    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: u8,
    /// Bandwidth in kHz: 125, 250, or 500.
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u32,

    // Node parameters: may vary per station based on operating conditions.
    /// Transmit power, 2..=20.
    #[serde(default = "default_power")]
    pub power: u8,
    /// Coding rate denominator: 4/5 .. 4/8, so 5..=8.
    #[serde(default = "default_coding_rate")]
    pub coding_rate: u8,
    /// Watchdog timer timeout in seconds, 0..=60. Zero disables it.
    #[serde(default = "default_watchdog")]
    pub watchdog_timeout_secs: u32,
}

/// Queue draining and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// A pending message is marked Failed once it has been attempted
    /// this many times without success.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pacing delay between loop iterations that did no radio work (ms).
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Lock file enforcing a single gateway instance per mailbox.
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    pub radio: RadioConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

fn default_firmware() -> String {
    "RN2903 1.0.5 Nov 06 2018 10:45:27".to_string()
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_frequency() -> u32 {
    923_300_000
}

fn default_true() -> bool {
    true
}

fn default_sync_word() -> String {
    "34".to_string()
}

fn default_spreading_factor() -> u8 {
    12
}

fn default_bandwidth() -> u32 {
    125
}

fn default_power() -> u8 {
    2
}

fn default_coding_rate() -> u8 {
    5
}

fn default_watchdog() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_idle_poll_ms() -> u64 {
    250
}

fn default_lock_file() -> String {
    "loragate.lock".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            idle_poll_ms: default_idle_poll_ms(),
            lock_file: default_lock_file(),
        }
    }
}

impl Config {
    /// Load configuration from a file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Range-check every tunable before any of them reach the radio.
    pub fn validate(&self) -> Result<()> {
        if self.station.id < 1 || self.station.id > 99 {
            return Err(anyhow!("station.id {} out of range (1-99)", self.station.id));
        }
        let r = &self.radio;
        if !(902_000_000..=928_000_000).contains(&r.frequency) {
            return Err(anyhow!(
                "radio.frequency {} out of range (902000000-928000000)",
                r.frequency
            ));
        }
        if r.sync_word.len() != 2 || !r.sync_word.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!(
                "radio.sync_word '{}' must be one hexadecimal byte",
                r.sync_word
            ));
        }
        if !(7..=12).contains(&r.spreading_factor) {
            return Err(anyhow!(
                "radio.spreading_factor {} out of range (7-12)",
                r.spreading_factor
            ));
        }
        if !matches!(r.bandwidth, 125 | 250 | 500) {
            return Err(anyhow!(
                "radio.bandwidth {} must be 125, 250, or 500",
                r.bandwidth
            ));
        }
        if !(2..=20).contains(&r.power) {
            return Err(anyhow!("radio.power {} out of range (2-20)", r.power));
        }
        if !(5..=8).contains(&r.coding_rate) {
            return Err(anyhow!(
                "radio.coding_rate {} out of range (5-8)",
                r.coding_rate
            ));
        }
        if r.watchdog_timeout_secs > 60 {
            return Err(anyhow!(
                "radio.watchdog_timeout_secs {} out of range (0-60)",
                r.watchdog_timeout_secs
            ));
        }
        if self.gateway.max_attempts == 0 {
            return Err(anyhow!("gateway.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station: StationConfig { id: 1 },
            radio: RadioConfig {
                port: String::new(),
                baud_rate: 57600,
                firmware_version: default_firmware(),
                read_timeout_ms: default_read_timeout_ms(),
                frequency: default_frequency(),
                crc_header: true,
                iq_inversion: false,
                sync_word: default_sync_word(),
                spreading_factor: default_spreading_factor(),
                bandwidth: default_bandwidth(),
                power: default_power(),
                coding_rate: default_coding_rate(),
                watchdog_timeout_secs: default_watchdog(),
            },
            gateway: GatewayConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("loragate.log".to_string()),
            },
        }
    }
}
