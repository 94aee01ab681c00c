//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/dapp.toml` (or the file passed with `--config`)
//! 3. Environment variables prefixed with `DAPP_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use dapp_pumps::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Glucose pump on {}", config.pumps.glucose.port);
//! # Ok::<(), dapp_pumps::error::PumpError>(())
//! ```

use crate::error::{PumpError, PumpResult};
use crate::experiment::ExperimentParams;
use crate::pump::{RateUnits, SerialSettings};
use crate::schedule::MixingModel;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/dapp.toml";

/// Prefix for environment overrides, e.g. `DAPP_PUMPS__GLUCOSE__PORT=/dev/ttyUSB0`.
pub const ENV_PREFIX: &str = "DAPP_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial ports of both pumps
    pub pumps: PumpsConfig,
    /// Serial line and exchange timing, shared by both pumps
    pub serial: SerialSettings,
    /// Physical run parameters
    pub experiment: ExperimentConfig,
    /// Dilution model for profile-driven runs
    pub mixing: MixingModel,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Port assignment for one pump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpPortConfig {
    /// Serial port path (e.g. `COM3`, `/dev/ttyUSB0`)
    pub port: String,
}

/// Port assignments for both pumps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpsConfig {
    /// Glucose stock pump
    pub glucose: PumpPortConfig,
    /// Buffer pump
    pub buffer: PumpPortConfig,
}

impl Default for PumpsConfig {
    fn default() -> Self {
        Self {
            glucose: PumpPortConfig {
                port: "COM3".to_string(),
            },
            buffer: PumpPortConfig {
                port: "COM4".to_string(),
            },
        }
    }
}

/// Physical run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Syringe inner diameter (mm)
    pub syringe_diameter_mm: f64,
    /// Tubing length from syringe to mixing point
    pub travel_length: f64,
    /// Dwell for steps without timing (seconds)
    pub dwell_secs: u64,
    /// Rate units sent with every `RAT` command
    pub rate_units: RateUnits,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            syringe_diameter_mm: 20.0,
            travel_length: 100.0,
            dwell_secs: 60,
            rate_units: RateUnits::MlPerMin,
        }
    }
}

impl ExperimentConfig {
    /// Parameters handed to the run sequencer.
    pub fn params(&self) -> ExperimentParams {
        ExperimentParams {
            dwell: self.dwell(),
            syringe_diameter_mm: self.syringe_diameter_mm,
            travel_length: self.travel_length,
            rate_units: self.rate_units,
        }
    }

    /// Configured dwell as a duration.
    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs)
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("Invalid {}: {}. Must be > 0", name, value))
    }
}

fn require_port(name: &str, port: &str) -> Result<(), String> {
    if port.trim().is_empty() {
        return Err(format!("Serial port for {} pump cannot be empty", name));
    }
    if port.contains('\0') {
        return Err(format!("Serial port for {} pump contains a null byte", name));
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from `config/dapp.toml` and environment variables
    pub fn load() -> PumpResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PumpResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// Load and validate in one step.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> PumpResult<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(PumpError::Configuration)?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            ));
        }

        require_port("glucose", &self.pumps.glucose.port)?;
        require_port("buffer", &self.pumps.buffer.port)?;
        if self.pumps.glucose.port == self.pumps.buffer.port {
            return Err(format!(
                "Glucose and buffer pumps share serial port {}",
                self.pumps.glucose.port
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err("Invalid baud_rate 0".to_string());
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(format!(
                "Invalid stop_bits {}. Must be 1 or 2",
                self.serial.stop_bits
            ));
        }
        if self.serial.response_timeout_ms == 0 {
            return Err("Invalid response_timeout_ms 0".to_string());
        }

        require_positive("syringe_diameter_mm", self.experiment.syringe_diameter_mm)?;
        require_positive("travel_length", self.experiment.travel_length)?;
        if self.experiment.dwell_secs == 0 {
            return Err("Invalid dwell_secs 0. Must be > 0".to_string());
        }

        require_positive("stock_concentration", self.mixing.stock_concentration)?;
        require_positive("total_flow_rate", self.mixing.total_flow_rate)?;

        Ok(())
    }

    /// Render the resolved configuration as TOML.
    pub fn to_toml(&self) -> PumpResult<String> {
        toml::to_string_pretty(self).map_err(|e| PumpError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pumps.glucose.port, "COM3");
        assert_eq!(config.pumps.buffer.port, "COM4");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.experiment.dwell(), Duration::from_secs(60));
        assert_eq!(config.mixing.stock_concentration, 33.0);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dapp.toml");
        let config = AppConfig::load_validated(path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from("/nonexistent/dapp.toml").unwrap();
        assert_eq!(config.experiment.syringe_diameter_mm, 20.0);
        assert_eq!(config.application.log_level, "info");
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
[pumps.glucose]
port = "/dev/ttyUSB0"

[experiment]
travel_length = 250.0
rate_units = "UM"

[mixing]
total_flow_rate = 12.0
"#,
        );

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pumps.glucose.port, "/dev/ttyUSB0");
        assert_eq!(config.pumps.buffer.port, "COM4");
        assert_eq!(config.experiment.travel_length, 250.0);
        assert_eq!(config.experiment.rate_units, RateUnits::UlPerMin);
        assert_eq!(config.experiment.syringe_diameter_mm, 20.0);
        assert_eq!(config.mixing.total_flow_rate, 12.0);
        assert_eq!(config.mixing.stock_concentration, 33.0);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let file = write_config("[experiment]\ntravel_length = \"far\"\n");
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, PumpError::Config(_)));
    }

    #[test]
    fn load_validated_rejects_bad_values() {
        let file = write_config("[experiment]\nsyringe_diameter_mm = 0.0\n");
        let err = AppConfig::load_validated(file.path()).unwrap_err();
        assert!(matches!(err, PumpError::Configuration(ref msg) if msg.contains("syringe_diameter_mm")));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.application.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_port_rejected() {
        let mut config = AppConfig::default();
        config.pumps.buffer.port = "COM3".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("share serial port"));
    }

    #[test]
    fn test_numeric_bounds() {
        let mut config = AppConfig::default();
        config.experiment.dwell_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.mixing.total_flow_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pumps.glucose.port = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_output_round_trips() {
        let mut config = AppConfig::default();
        config.experiment.travel_length = 42.5;
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("port = \"COM3\""));

        let file = write_config(&rendered);
        let reloaded = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn params_carry_experiment_settings() {
        let params = AppConfig::default().experiment.params();
        assert_eq!(params.dwell, Duration::from_secs(60));
        assert_eq!(params.travel_length, 100.0);
        assert_eq!(params.rate_units, RateUnits::MlPerMin);
    }
}
