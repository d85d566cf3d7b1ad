//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PumpError, Result};
use crate::mkr5::protocol::{is_valid_address, MAX_PUMP_ADDRESS, MIN_PUMP_ADDRESS};
use crate::serial::SUPPORTED_BAUD_RATES;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub parity: ParityConfig,
}

/// Line parity; pump electronics commonly use odd parity
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    None,
    #[default]
    Odd,
    Even,
}

impl From<ParityConfig> for tokio_serial::Parity {
    fn from(parity: ParityConfig) -> Self {
        match parity {
            ParityConfig::None => tokio_serial::Parity::None,
            ParityConfig::Odd => tokio_serial::Parity::Odd,
            ParityConfig::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Exchange timing
#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_price_update_timeout_ms")]
    pub price_update_timeout_ms: u64,

    #[serde(default = "default_price_update_settle_ms")]
    pub price_update_settle_ms: u64,

    #[serde(default = "default_secondary_delay_ms")]
    pub secondary_delay_ms: u64,

    #[serde(default = "default_secondary_window_ms")]
    pub secondary_window_ms: u64,
}

/// Address range scanned for pumps
#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_min_address")]
    pub min_address: u8,

    #[serde(default = "default_max_address")]
    pub max_address: u8,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }

fn default_response_timeout_ms() -> u64 { 100 }
fn default_price_update_timeout_ms() -> u64 { 500 }
fn default_price_update_settle_ms() -> u64 { 50 }
fn default_secondary_delay_ms() -> u64 { 50 }
fn default_secondary_window_ms() -> u64 { 100 }

fn default_min_address() -> u8 { MIN_PUMP_ADDRESS }
fn default_max_address() -> u8 { MAX_PUMP_ADDRESS }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            parity: ParityConfig::default(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            price_update_timeout_ms: default_price_update_timeout_ms(),
            price_update_settle_ms: default_price_update_settle_ms(),
            secondary_delay_ms: default_secondary_delay_ms(),
            secondary_window_ms: default_secondary_window_ms(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_address: default_min_address(),
            max_address: default_max_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl ProtocolConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn price_update_timeout(&self) -> Duration {
        Duration::from_millis(self.price_update_timeout_ms)
    }

    pub fn price_update_settle(&self) -> Duration {
        Duration::from_millis(self.price_update_settle_ms)
    }

    pub fn secondary_delay(&self) -> Duration {
        Duration::from_millis(self.secondary_delay_ms)
    }

    pub fn secondary_window(&self) -> Duration {
        Duration::from_millis(self.secondary_window_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mkr5_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200"));
        }

        // Validate timing fields
        for (name, value, max) in [
            ("response_timeout_ms", self.protocol.response_timeout_ms, 10_000),
            ("price_update_timeout_ms", self.protocol.price_update_timeout_ms, 10_000),
            ("secondary_window_ms", self.protocol.secondary_window_ms, 10_000),
        ] {
            if value == 0 || value > max {
                return Err(invalid(format!("{} must be between 1 and {}", name, max)));
            }
        }

        for (name, value) in [
            ("price_update_settle_ms", self.protocol.price_update_settle_ms),
            ("secondary_delay_ms", self.protocol.secondary_delay_ms),
        ] {
            if value > 10_000 {
                return Err(invalid(format!("{} must be at most 10000", name)));
            }
        }

        // Validate scan range
        if !is_valid_address(self.scan.min_address) || !is_valid_address(self.scan.max_address) {
            return Err(invalid(format!(
                "scan addresses must be between 0x{:02X} and 0x{:02X}",
                MIN_PUMP_ADDRESS, MAX_PUMP_ADDRESS
            )));
        }

        if self.scan.min_address > self.scan.max_address {
            return Err(invalid("scan min_address must not exceed max_address"));
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        if matches!(&self.logging.log_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging log_dir cannot be empty when set"));
        }

        Ok(())
    }
}

fn invalid(message: impl std::fmt::Display) -> PumpError {
    PumpError::Config(toml::de::Error::custom(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load_str(content: &str) -> Result<Config> {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        Config::load(temp_file.path())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.parity, ParityConfig::Odd);
        assert_eq!(config.protocol.response_timeout(), Duration::from_millis(100));
        assert_eq!(config.protocol.price_update_timeout(), Duration::from_millis(500));
        assert_eq!(config.scan.min_address, 0x50);
        assert_eq!(config.scan.max_address, 0x6F);
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let config = load_str(
            r#"
[serial]
port = "/dev/ttyS1"
baud_rate = 19200
parity = "even"

[protocol]
response_timeout_ms = 250

[scan]
min_address = 0x50
max_address = 0x57

[logging]
level = "debug"
log_dir = "./logs"
"#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyS1");
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.serial.parity, ParityConfig::Even);
        assert_eq!(config.protocol.response_timeout_ms, 250);
        assert_eq!(config.protocol.secondary_window_ms, 100);
        assert_eq!(config.scan.max_address, 0x57);
        assert_eq!(config.logging.log_dir.as_deref(), Some("./logs"));
    }

    #[test]
    fn test_load_empty_file_uses_defaults() {
        let config = load_str("").unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.scan.min_address, MIN_PUMP_ADDRESS);
    }

    #[test]
    fn test_shipped_default_file() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.serial.parity, ParityConfig::Odd);
        assert_eq!(config.protocol.price_update_settle_ms, 50);
        assert_eq!(config.scan.max_address, MAX_PUMP_ADDRESS);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/mkr5-bridge.toml");
        assert!(matches!(result, Err(PumpError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = load_str("[serial\nport = ");
        assert!(matches!(result, Err(PumpError::Config(_))));
    }

    #[test]
    fn test_unknown_parity() {
        let result = load_str("[serial]\nparity = \"mark\"\n");
        assert!(matches!(result, Err(PumpError::Config(_))));
    }

    #[test]
    fn test_parity_conversion() {
        assert_eq!(tokio_serial::Parity::from(ParityConfig::Odd), tokio_serial::Parity::Odd);
        assert_eq!(tokio_serial::Parity::from(ParityConfig::None), tokio_serial::Parity::None);
        assert_eq!(tokio_serial::Parity::from(ParityConfig::Even), tokio_serial::Parity::Even);
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = Config::default();
        config.serial.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 115200;
        assert!(config.validate().is_err());

        config.serial.baud_rate = 19200;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_response_timeout_zero() {
        let mut config = Config::default();
        config.protocol.response_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_timeout_too_high() {
        let mut config = Config::default();
        config.protocol.response_timeout_ms = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_price_update_timeout_zero() {
        let mut config = Config::default();
        config.protocol.price_update_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secondary_window_zero() {
        let mut config = Config::default();
        config.protocol.secondary_window_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settle_delay_may_be_zero() {
        let mut config = Config::default();
        config.protocol.price_update_settle_ms = 0;
        config.protocol.secondary_delay_ms = 0;
        assert!(config.validate().is_ok());

        config.protocol.secondary_delay_ms = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_address_out_of_range() {
        let mut config = Config::default();
        config.scan.min_address = 0x4F;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.max_address = 0x70;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_range_reversed() {
        let mut config = Config::default();
        config.scan.min_address = 0x60;
        config.scan.max_address = 0x55;
        assert!(config.validate().is_err());

        config.scan.max_address = 0x60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_log_dir_when_set() {
        let mut config = Config::default();
        config.logging.log_dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_level() {
        let mut config = Config::default();
        config.logging.level = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
