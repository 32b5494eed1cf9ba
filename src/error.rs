//! Custom error types for the measurement core.
//!
//! This module defines the primary error type, `VnaError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report the few conditions that are genuine failures of this core.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidParameterIndex`**: A touchstone import asked for an S-parameter beyond
//!   the file's `ports²` bound. The import fails and the trace is left untouched.
//! - **`MissingCalibrationStandards`**: `construct` was asked for a calibration type
//!   whose required standards have not all been measured. Nothing is attempted.
//! - **`CalibrationSolverFailure`**: The error-term solver rejected the measured
//!   standards. Calibration is forced back to `Disabled`.
//! - **`UnknownTrace` / `UnknownMarker`**: An id that is not (or no longer) registered.
//! - **`ReadOnlyTrace`**: A sample was pushed into a touchstone or calibration trace.
//! - **`Config` / `Configuration`**: Loading or validating the settings file.
//!
//! Out-of-range sweep inputs are *not* errors: they are clamped to the device limits.
//! Queries on empty or out-of-range data are not errors either: they return NaN.

use crate::calibration::{CalibrationMeasurement, CalibrationType};
use crate::data::markers::MarkerId;
use crate::data::trace::TraceId;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, VnaError>;

/// Primary error type for the VNA core.
#[derive(Error, Debug)]
pub enum VnaError {
    /// Touchstone import requested a parameter index outside `0..ports²`.
    #[error("Parameter index {parameter} out of range for a {ports}-port touchstone file")]
    InvalidParameterIndex {
        /// Requested 0-based parameter index
        parameter: usize,
        /// Number of ports in the source data
        ports: usize,
    },

    /// Not all standards required by a calibration type have been measured.
    #[error("Missing calibration standards for {calibration}: {}", format_missing(.missing))]
    MissingCalibrationStandards {
        /// Calibration type that was requested
        calibration: CalibrationType,
        /// Standards without a complete measurement
        missing: Vec<CalibrationMeasurement>,
    },

    /// The error-term solver failed on the measured standards.
    #[error("Calibration failure: {0}")]
    CalibrationSolverFailure(String),

    /// A calibration cannot be constructed while a standard is being measured.
    #[error("Calibration measurement of {0} still in progress")]
    CalibrationBusy(CalibrationMeasurement),

    /// Trace id not registered in the trace model.
    #[error("Unknown trace {0}")]
    UnknownTrace(TraceId),

    /// Marker id not registered in the marker model.
    #[error("Unknown marker {0}")]
    UnknownMarker(MarkerId),

    /// Samples can only be added to live traces.
    #[error("Trace {0} is read-only (not a live trace)")]
    ReadOnlyTrace(TraceId),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but contains semantically invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for VnaError {
    fn from(err: figment::Error) -> Self {
        VnaError::Config(Box::new(err))
    }
}

fn format_missing(missing: &[CalibrationMeasurement]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
