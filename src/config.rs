//! # Control Unit Configuration
//!
//! A single TOML file configures the HTTP surface, the message bus, the
//! actuator serial link, the thermal policy and the device liveness timeouts.
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [bus]
//! host = "broker.local"
//! temperature_topic = "esp32/data/temperature"
//!
//! [thermal]
//! hot_threshold = 28.0
//! too_hot_threshold = 65.0
//! alarm_dwell_ms = 15000
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the control unit.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP control surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Serve a canned snapshot instead of talking to the coordinator.
    #[serde(default)]
    pub use_mock: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            use_mock: false,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Message bus (MQTT) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_host")]
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_temperature_topic")]
    pub temperature_topic: String,
    #[serde(default = "default_interval_topic")]
    pub interval_topic: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_bus_retry_ms")]
    pub retry_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_bus_host(),
            port: default_bus_port(),
            client_id: default_client_id(),
            temperature_topic: default_temperature_topic(),
            interval_topic: default_interval_topic(),
            keep_alive_secs: default_keep_alive_secs(),
            retry_ms: default_bus_retry_ms(),
        }
    }
}

/// Actuator serial link configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    #[serde(default = "default_handshake_spacing_ms")]
    pub handshake_spacing_ms: u64,
    #[serde(default = "default_search_retry_ms")]
    pub search_retry_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_command_period_ms")]
    pub command_period_ms: u64,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    /// Drive the link against an in-process simulated actuator.
    #[serde(default)]
    pub simulate: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
            handshake_attempts: default_handshake_attempts(),
            handshake_spacing_ms: default_handshake_spacing_ms(),
            search_retry_ms: default_search_retry_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            command_period_ms: default_command_period_ms(),
            inbound_capacity: default_inbound_capacity(),
            simulate: false,
        }
    }
}

/// Thermal policy thresholds and sampling cadences.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThermalConfig {
    /// Upper bound of the normal band (t1).
    #[serde(default = "default_hot_threshold")]
    pub hot_threshold: f64,
    /// Upper bound of the hot band (t2).
    #[serde(default = "default_too_hot_threshold")]
    pub too_hot_threshold: f64,
    #[serde(default = "default_normal_interval_ms")]
    pub normal_interval_ms: u64,
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,
    #[serde(default = "default_alarm_dwell_ms")]
    pub alarm_dwell_ms: u64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            hot_threshold: default_hot_threshold(),
            too_hot_threshold: default_too_hot_threshold(),
            normal_interval_ms: default_normal_interval_ms(),
            fast_interval_ms: default_fast_interval_ms(),
            alarm_dwell_ms: default_alarm_dwell_ms(),
            history_size: default_history_size(),
        }
    }
}

/// Per-device offline timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DevicesConfig {
    #[serde(default = "default_bus_peer_timeout_ms")]
    pub bus_peer_timeout_ms: u64,
    #[serde(default = "default_actuator_timeout_ms")]
    pub actuator_timeout_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            bus_peer_timeout_ms: default_bus_peer_timeout_ms(),
            actuator_timeout_ms: default_actuator_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

impl Config {
    /// Reject configurations the policy engine and link driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thermal = &self.thermal;
        if !(thermal.hot_threshold < thermal.too_hot_threshold) {
            return Err(ConfigError::Invalid(format!(
                "hot_threshold ({}) must be below too_hot_threshold ({})",
                thermal.hot_threshold, thermal.too_hot_threshold
            )));
        }
        if thermal.history_size == 0 {
            return Err(ConfigError::Invalid("history_size must be > 0".to_string()));
        }
        if thermal.normal_interval_ms == 0 || thermal.fast_interval_ms == 0 {
            return Err(ConfigError::Invalid("sampling intervals must be > 0".to_string()));
        }
        if self.serial.handshake_attempts == 0 {
            return Err(ConfigError::Invalid("handshake_attempts must be > 0".to_string()));
        }
        if self.serial.inbound_capacity == 0 {
            return Err(ConfigError::Invalid("inbound_capacity must be > 0".to_string()));
        }
        if self.serial.command_period_ms == 0 || self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "command_period_ms and read_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.devices.bus_peer_timeout_ms == 0 || self.devices.actuator_timeout_ms == 0 {
            return Err(ConfigError::Invalid("device timeouts must be > 0".to_string()));
        }
        self.logging.tracing_level()?;
        Ok(())
    }
}

// Default value functions
fn default_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_request_timeout_ms() -> u64 { 2000 }
fn default_bus_host() -> String { "localhost".to_string() }
fn default_bus_port() -> u16 { 1883 }
fn default_client_id() -> String { "iot-server".to_string() }
fn default_temperature_topic() -> String { "esp32/data/temperature".to_string() }
fn default_interval_topic() -> String { "esp32/config/interval".to_string() }
fn default_keep_alive_secs() -> u64 { 3 }
fn default_bus_retry_ms() -> u64 { 500 }
fn default_baud() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 2000 }
fn default_handshake_attempts() -> u32 { 5 }
fn default_handshake_spacing_ms() -> u64 { 500 }
fn default_search_retry_ms() -> u64 { 1000 }
fn default_reconnect_delay_ms() -> u64 { 5000 }
fn default_command_period_ms() -> u64 { 250 }
fn default_inbound_capacity() -> usize { 20 }
fn default_hot_threshold() -> f64 { 30.0 }
fn default_too_hot_threshold() -> f64 { 70.0 }
fn default_normal_interval_ms() -> u64 { 500 }
fn default_fast_interval_ms() -> u64 { 100 }
fn default_alarm_dwell_ms() -> u64 { 10_000 }
fn default_history_size() -> usize { 100 }
fn default_bus_peer_timeout_ms() -> u64 { 2000 }
fn default_actuator_timeout_ms() -> u64 { 5000 }
fn default_log_level() -> String { "info".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.serial.handshake_attempts, 5);
        assert_eq!(config.serial.inbound_capacity, 20);
        assert!(!config.serial.simulate);
        assert_eq!(config.thermal.hot_threshold, 30.0);
        assert_eq!(config.thermal.too_hot_threshold, 70.0);
        assert_eq!(config.thermal.history_size, 100);
        assert_eq!(config.bus.interval_topic, "esp32/config/interval");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("climate.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[thermal]\nhot_threshold = 25.0\nalarm_dwell_ms = 3000").unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.thermal.hot_threshold, 25.0);
        assert_eq!(config.thermal.alarm_dwell_ms, 3000);
        // Defaults for missing fields
        assert_eq!(config.thermal.too_hot_threshold, 70.0);
        assert_eq!(config.bus.port, 1883);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.thermal.hot_threshold = 80.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_history() {
        let mut config = Config::default();
        config.thermal.history_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::DEBUG);
    }
}
