//! Driver configuration using Figment
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `SPECTRO_`, nested keys separated
//!    by `__`
//! 2. A TOML configuration file
//!
//! Every section has defaults, so an empty (or missing) file is valid.
//!
//! ```text
//! SPECTRO_COMMS__PORT=/dev/ttyUSB0
//! SPECTRO_SESSION__AUTO_CALIBRATE=false
//! SPECTRO_LOGGING__LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_spectro::config::DriverConfig;
//!
//! let config = DriverConfig::load_from("spectro.toml")?;
//! println!("Port: {}", config.comms.port);
//! # Ok::<(), rust_spectro::config::ConfigError>(())
//! ```

use crate::adapters::{CommsParams, PortSelector};
use crate::hardware::ModelProfile;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),

    /// Values loaded but are inconsistent
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::LoadError(Box::new(err))
    }
}

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    /// Port and line settings
    #[serde(default)]
    pub comms: CommsConfig,
    /// Session behaviour
    #[serde(default)]
    pub session: SessionConfig,
    /// Calibration expiry
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Measurement thresholds
    #[serde(default)]
    pub measurement: MeasurementConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Replacement for the built-in model profile
    #[serde(default)]
    pub profile: Option<ModelProfile>,
}

/// Communications settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommsConfig {
    /// Port selector: `usb:<n>` or a serial device path
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate for serial links
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Hardware flow control
    #[serde(default)]
    pub flow_control: bool,
    /// Open timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Calibrate silently before measuring when possible
    #[serde(default = "default_true")]
    pub auto_calibrate: bool,
    /// How long to wait for a trigger, in milliseconds
    #[serde(default = "default_trigger_timeout_ms")]
    pub trigger_timeout_ms: u64,
    /// Instrument switch poll interval, in milliseconds
    #[serde(default = "default_switch_poll_ms")]
    pub switch_poll_ms: u64,
    /// Log per-session lifecycle detail at debug level
    #[serde(default)]
    pub debug: bool,
    /// 0 = quiet, 1 = operations, 2+ = frame dumps at trace level
    #[serde(default)]
    pub verbosity: u8,
}

/// Calibration expiry and usage limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Reflective dark reference lifetime (s)
    #[serde(default = "default_dark_secs")]
    pub reflective_dark_secs: u64,
    /// Reflective white reference lifetime (s)
    #[serde(default = "default_white_secs")]
    pub reflective_white_secs: u64,
    /// Emissive dark reference lifetime (s)
    #[serde(default = "default_dark_secs")]
    pub emissive_dark_secs: u64,
    /// Transmission dark reference lifetime (s)
    #[serde(default = "default_dark_secs")]
    pub transmission_dark_secs: u64,
    /// Transmission white reference lifetime (s)
    #[serde(default = "default_white_secs")]
    pub transmission_white_secs: u64,
    /// Display integration time lifetime (s)
    #[serde(default = "default_white_secs")]
    pub display_int_time_secs: u64,
    /// Readings a dark reference may serve (0 = unlimited)
    #[serde(default)]
    pub max_readings_per_dark: u32,
}

/// Measurement thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Default relative level change marking a patch edge
    #[serde(default = "default_scan_tolerance")]
    pub scan_tolerance: f64,
    /// Relative spread allowed across spot frames
    #[serde(default = "default_spot_consistency")]
    pub spot_consistency: f64,
    /// Fraction of the flash rise marking a flash frame
    #[serde(default = "default_flash_threshold")]
    pub flash_threshold: f64,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_port() -> String {
    "usb:0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_trigger_timeout_ms() -> u64 {
    60_000
}

fn default_switch_poll_ms() -> u64 {
    100
}

fn default_dark_secs() -> u64 {
    60 * 60
}

fn default_white_secs() -> u64 {
    24 * 60 * 60
}

fn default_scan_tolerance() -> f64 {
    0.1
}

fn default_spot_consistency() -> f64 {
    0.05
}

fn default_flash_threshold() -> f64 {
    0.3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            flow_control: false,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_calibrate: true,
            trigger_timeout_ms: default_trigger_timeout_ms(),
            switch_poll_ms: default_switch_poll_ms(),
            debug: false,
            verbosity: 0,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reflective_dark_secs: default_dark_secs(),
            reflective_white_secs: default_white_secs(),
            emissive_dark_secs: default_dark_secs(),
            transmission_dark_secs: default_dark_secs(),
            transmission_white_secs: default_white_secs(),
            display_int_time_secs: default_white_secs(),
            max_readings_per_dark: 0,
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            scan_tolerance: default_scan_tolerance(),
            spot_consistency: default_spot_consistency(),
            flash_threshold: default_flash_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl DriverConfig {
    /// Load configuration from a TOML file and `SPECTRO_` environment variables.
    ///
    /// A missing file is not an error; defaults apply. The result is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("SPECTRO_").split("__")),
        )
    }

    /// Extract and validate from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Port selector parses
    /// - Timeouts and tolerances are positive
    /// - The profile override, if any, is consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        self.port_selector()?;

        if self.comms.timeout_ms == 0 || self.comms.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "comms.timeout_ms and comms.baud_rate must be positive".to_string(),
            ));
        }
        if self.session.trigger_timeout_ms == 0 || self.session.switch_poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session.trigger_timeout_ms and session.switch_poll_ms must be positive"
                    .to_string(),
            ));
        }

        let m = &self.measurement;
        for (name, value) in [
            ("scan_tolerance", m.scan_tolerance),
            ("spot_consistency", m.spot_consistency),
            ("flash_threshold", m.flash_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "measurement.{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if m.flash_threshold >= 1.0 {
            return Err(ConfigError::ValidationError(
                "measurement.flash_threshold must be below 1".to_string(),
            ));
        }

        if let Some(profile) = &self.profile {
            profile.validate()?;
        }
        Ok(())
    }

    /// Parsed port selector.
    pub fn port_selector(&self) -> Result<PortSelector, ConfigError> {
        self.comms
            .port
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("comms.port: {}", e)))
    }

    /// Line parameters for opening the port.
    pub fn comms_params(&self) -> CommsParams {
        CommsParams {
            baud_rate: self.comms.baud_rate,
            flow_control: self.comms.flow_control,
        }
    }

    /// Open timeout.
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.comms.timeout_ms)
    }

    /// Model profile in effect.
    pub fn profile(&self) -> ModelProfile {
        self.profile.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn empty_file_gives_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("spectro.toml", "")?;
            let config = DriverConfig::load_from("spectro.toml").expect("defaults load");
            assert_eq!(config, DriverConfig::default());
            assert_eq!(config.port_selector().expect("port"), PortSelector::Usb { index: 0 });
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "spectro.toml",
                r#"
                [comms]
                port = "/dev/ttyUSB1"

                [session]
                auto_calibrate = true
                "#,
            )?;
            jail.set_env("SPECTRO_SESSION__AUTO_CALIBRATE", "false");
            jail.set_env("SPECTRO_LOGGING__LEVEL", "debug");

            let config = DriverConfig::load_from("spectro.toml").expect("config loads");
            assert!(!config.session.auto_calibrate);
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.comms.port, "/dev/ttyUSB1");
            Ok(())
        });
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = DriverConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.measurement.scan_tolerance = -1.0;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.comms.port = "usb:abc".to_string();
        assert!(config.validate().is_err());
    }
}
