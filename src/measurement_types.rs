//! Measurement data types shared between the instrument stream, the trace store
//! and the calibration pipeline.
//!
//! A [`Sample`] is the atomic unit stored in a trace. A [`VnaDatapoint`] is what
//! the instrument driver delivers once per frequency point: the point index within
//! the sweep plus one complex value per measured S-parameter.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// One complex measurement at one frequency.
///
/// Frequency is the natural ordering key of a trace. Samples are immutable once
/// committed to a trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Frequency in Hz (> 0)
    pub frequency: f64,
    /// Complex measured value
    pub value: Complex64,
}

impl Sample {
    /// Create a new sample.
    pub fn new(frequency: f64, value: Complex64) -> Self {
        Self { frequency, value }
    }

    /// Magnitude of the complex value.
    pub fn magnitude(&self) -> f64 {
        self.value.norm()
    }
}

/// S-parameter a live trace follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveParameter {
    /// Reflection at port 1
    S11,
    /// Transmission from port 2 to port 1
    S12,
    /// Transmission from port 1 to port 2
    S21,
    /// Reflection at port 2
    S22,
}

impl LiveParameter {
    /// All parameters in matrix order.
    pub const ALL: [LiveParameter; 4] = [
        LiveParameter::S11,
        LiveParameter::S12,
        LiveParameter::S21,
        LiveParameter::S22,
    ];

    /// Whether this parameter lies on the diagonal of the S-matrix.
    pub fn is_reflection(self) -> bool {
        matches!(self, LiveParameter::S11 | LiveParameter::S22)
    }

    /// Port that has to be excited to measure this parameter.
    pub fn excited_port(self) -> u8 {
        match self {
            LiveParameter::S11 | LiveParameter::S21 => 1,
            LiveParameter::S12 | LiveParameter::S22 => 2,
        }
    }

    /// Display name ("S11", ...).
    pub fn as_str(self) -> &'static str {
        match self {
            LiveParameter::S11 => "S11",
            LiveParameter::S12 => "S12",
            LiveParameter::S21 => "S21",
            LiveParameter::S22 => "S22",
        }
    }
}

impl std::fmt::Display for LiveParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point of a sweep as delivered by the instrument driver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VnaDatapoint {
    /// Position of this point within the sweep (0-based)
    pub point_index: u32,
    /// Frequency in Hz
    pub frequency: f64,
    /// Reflection at port 1
    pub s11: Complex64,
    /// Transmission from port 2 to port 1
    pub s12: Complex64,
    /// Transmission from port 1 to port 2
    pub s21: Complex64,
    /// Reflection at port 2
    pub s22: Complex64,
}

impl VnaDatapoint {
    /// Datapoint with all four parameters set to zero.
    pub fn zero(point_index: u32, frequency: f64) -> Self {
        let zero = Complex64::new(0.0, 0.0);
        Self {
            point_index,
            frequency,
            s11: zero,
            s12: zero,
            s21: zero,
            s22: zero,
        }
    }

    /// Value of a single S-parameter.
    pub fn parameter(&self, param: LiveParameter) -> Complex64 {
        match param {
            LiveParameter::S11 => self.s11,
            LiveParameter::S12 => self.s12,
            LiveParameter::S21 => self.s21,
            LiveParameter::S22 => self.s22,
        }
    }

    /// Overwrite a single S-parameter.
    pub fn set_parameter(&mut self, param: LiveParameter, value: Complex64) {
        match param {
            LiveParameter::S11 => self.s11 = value,
            LiveParameter::S12 => self.s12 = value,
            LiveParameter::S21 => self.s21 = value,
            LiveParameter::S22 => self.s22 = value,
        }
    }

    /// Sample for a single S-parameter at this point's frequency.
    pub fn sample(&self, param: LiveParameter) -> Sample {
        Sample::new(self.frequency, self.parameter(param))
    }
}
