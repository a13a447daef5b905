//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::device::DriverKind;
use crate::error::{Result, SdDumperError};
use crate::telemetry::sink::ReportFormat;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Board connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_driver")]
    pub driver: String,

    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    #[serde(default = "default_product_id")]
    pub product_id: u16,

    #[serde(default)]
    pub interface: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Sampling loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default)]
    pub diagnostics_only: bool,

    #[serde(default)]
    pub measured_elapsed: bool,

    #[serde(default = "default_health_poll_ms")]
    pub health_poll_ms: u64,
}

/// Report output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_format")]
    pub format: String,
}

// Default value functions
fn default_driver() -> String { "libusb".to_string() }
fn default_vendor_id() -> u16 { 0x04B4 }
fn default_product_id() -> u16 { 0x00F1 }
fn default_timeout_ms() -> u64 { 1000 }

fn default_period_ms() -> u64 { 5000 }
fn default_health_poll_ms() -> u64 { 100 }

fn default_report_format() -> String { "text".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            interface: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            diagnostics_only: false,
            measured_elapsed: false,
            health_poll_ms: default_health_poll_ms(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: default_report_format(),
        }
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
    /// use sd_dumper::config::Config;
    ///
    /// let config = Config::load("config/sd-dumper.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Driver kind named in `[device]`
    pub fn driver_kind(&self) -> Result<DriverKind> {
        self.device.driver.parse()
    }

    /// Report format named in `[report]`
    pub fn report_format(&self) -> Result<ReportFormat> {
        self.report.format.parse()
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        self.driver_kind()?;
        self.report_format()?;

        if self.device.vendor_id == 0 || self.device.product_id == 0 {
            return Err(SdDumperError::Config(
                toml::de::Error::custom("vendor_id and product_id must be non-zero")
            ));
        }

        if self.device.timeout_ms == 0 || self.device.timeout_ms > 60000 {
            return Err(SdDumperError::Config(
                toml::de::Error::custom("timeout_ms must be between 1 and 60000")
            ));
        }

        if self.monitor.period_ms < 100 || self.monitor.period_ms > 600000 {
            return Err(SdDumperError::Config(
                toml::de::Error::custom("period_ms must be between 100 and 600000")
            ));
        }

        if self.monitor.health_poll_ms < 10 || self.monitor.health_poll_ms > 10000 {
            return Err(SdDumperError::Config(
                toml::de::Error::custom("health_poll_ms must be between 10 and 10000")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.driver_kind().unwrap(), DriverKind::NativeUsb);
        assert_eq!(config.report_format().unwrap(), ReportFormat::Text);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[device]
driver = "cypress"
vendor_id = 0x04B4
product_id = 0x00F3
timeout_ms = 250

[monitor]
period_ms = 2000
diagnostics_only = true

[report]
format = "jsonl"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.driver_kind().unwrap(), DriverKind::VendorApi);
        assert_eq!(config.device.product_id, 0x00F3);
        assert_eq!(config.device.timeout_ms, 250);
        assert_eq!(config.device.interface, 0);
        assert_eq!(config.monitor.period_ms, 2000);
        assert!(config.monitor.diagnostics_only);
        assert!(!config.monitor.measured_elapsed);
        assert_eq!(config.monitor.health_poll_ms, 100);
        assert_eq!(config.report_format().unwrap(), ReportFormat::JsonLines);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/sd-dumper.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.device.vendor_id, default_vendor_id());
        assert_eq!(config.monitor.period_ms, default_period_ms());
    }

    #[test]
    fn test_load_empty_file_uses_defaults() {
        use tempfile::NamedTempFile;

        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.device.driver, "libusb");
        assert_eq!(config.monitor.period_ms, 5000);
        assert_eq!(config.report.format, "text");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/sd-dumper.toml");
        assert!(matches!(result, Err(SdDumperError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[monitor\nperiod_ms = ").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(Config::load(temp_file.path()), Err(SdDumperError::Config(_))));
    }

    #[test]
    fn test_unknown_driver() {
        let mut config = Config::default();
        config.device.driver = "winusb".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_report_format() {
        let mut config = Config::default();
        config.report.format = "csv".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_vendor_id() {
        let mut config = Config::default();
        config.device.vendor_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_zero() {
        let mut config = Config::default();
        config.device.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_too_high() {
        let mut config = Config::default();
        config.device.timeout_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_period_too_short() {
        let mut config = Config::default();
        config.monitor.period_ms = 99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_period_too_long() {
        let mut config = Config::default();
        config.monitor.period_ms = 600001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_health_poll_out_of_range() {
        let mut config = Config::default();
        config.monitor.health_poll_ms = 5;
        assert!(config.validate().is_err());
        config.monitor.health_poll_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_report_formats() {
        for format in ["text", "jsonl", "log"] {
            let mut config = Config::default();
            config.report.format = format.to_string();
            assert!(config.validate().is_ok(), "Format {} should be valid", format);
        }
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_driver(), "libusb");
        assert_eq!(default_vendor_id(), 0x04B4);
        assert_eq!(default_product_id(), 0x00F1);
        assert_eq!(default_timeout_ms(), 1000);
        assert_eq!(default_period_ms(), 5000);
        assert_eq!(default_health_poll_ms(), 100);
        assert_eq!(default_report_format(), "text");
    }
}
