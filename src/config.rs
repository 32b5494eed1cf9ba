//! Configuration loading using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. `config/rust_vna.toml` (or an explicit path)
//! 3. Environment variables prefixed with `RUST_VNA_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use rust_vna::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // RUST_VNA_SWEEP__POINTS=201 overrides sweep.points
//! let settings = Settings::load()?;
//! println!("Sweeping {} points", settings.sweep.points);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, VnaError};
use crate::events::EVENT_CHANNEL_CAPACITY;
use crate::sweep::{DeviceLimits, SweepSettings};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/rust_vna.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Capability limits used to clamp sweep settings
    #[serde(default)]
    pub limits: DeviceLimits,
    /// Initial sweep
    #[serde(default)]
    pub sweep: SweepSettings,
    /// Acquisition behaviour
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Rust VNA".to_string(),
            log_level: "info".to_string(),
            log_format: default_log_format(),
        }
    }
}

/// How datapoints are acquired and fed into the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Excite both ports even if no visible trace needs one of them
    #[serde(default)]
    pub always_excite_both_ports: bool,
    /// Ignore calibration points until the next sweep starts
    #[serde(default = "default_true")]
    pub calibration_wait_first: bool,
    /// Buffered events per async subscriber
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            always_excite_both_ports: false,
            calibration_wait_first: true,
            event_channel_capacity: default_event_capacity(),
        }
    }
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    EVENT_CHANNEL_CAPACITY
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_VNA_").split("__"))
            .extract()?;
        settings.validate().map_err(VnaError::Configuration)?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        self.limits.validate()?;

        // Out-of-range sweeps are clamped, but nonsense values are not
        if !(self.sweep.f_start.is_finite() && self.sweep.f_stop.is_finite()) {
            return Err("Sweep frequencies must be finite".to_string());
        }
        if self.sweep.f_start > self.sweep.f_stop {
            return Err(format!(
                "Sweep start {} Hz lies above stop {} Hz",
                self.sweep.f_start, self.sweep.f_stop
            ));
        }

        if self.acquisition.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be at least 1".to_string());
        }

        Ok(())
    }

    /// Initial sweep clamped to the configured limits.
    pub fn constrained_sweep(&self) -> SweepSettings {
        let mut sweep = self.sweep;
        sweep.constrain(&self.limits);
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.limits.max_points, 4501);
        assert!(settings.acquisition.calibration_wait_first);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.contains("Invalid log_level"));
    }

    #[test]
    fn test_inverted_sweep_rejected() {
        let mut settings = Settings::default();
        settings.sweep.f_start = 2.0e9;
        settings.sweep.f_stop = 1.0e9;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_constrained_sweep_clamps() {
        let mut settings = Settings::default();
        settings.sweep.points = 10_000;
        settings.sweep.f_stop = 9.0e9;
        let sweep = settings.constrained_sweep();
        assert_eq!(sweep.points, settings.limits.max_points);
        assert_eq!(sweep.f_stop, settings.limits.max_freq);
    }
}
