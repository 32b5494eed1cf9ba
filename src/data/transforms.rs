//! Derived views of trace data.
//!
//! [`ViewType`] is a closed set; every dispatch below is an exhaustive `match`,
//! so adding a view forces every transform to handle it. All transforms are
//! pure and map invalid or missing input to NaN rather than failing.

use crate::data::tdr::TdrPoint;
use crate::data::trace::Trace;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Reference impedance in Ohm.
pub const REFERENCE_IMPEDANCE: f64 = 50.0;

/// Quantity shown on the y axis of a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewType {
    /// `20·log10(|S|)` in dB
    Magnitude,
    /// `arg(S)` in degrees
    Phase,
    /// Voltage standing-wave ratio (reflection traces only)
    Vswr,
    /// Real part of the TDR impulse response
    Impulse,
    /// TDR step response
    Step,
    /// Impedance derived from the step response, in Ohm
    Impedance,
}

impl ViewType {
    /// All view types.
    pub const ALL: [ViewType; 6] = [
        ViewType::Magnitude,
        ViewType::Phase,
        ViewType::Vswr,
        ViewType::Impulse,
        ViewType::Step,
        ViewType::Impedance,
    ];

    /// Views whose x axis is time rather than frequency.
    pub fn is_time_domain(self) -> bool {
        match self {
            ViewType::Magnitude | ViewType::Phase | ViewType::Vswr => false,
            ViewType::Impulse | ViewType::Step | ViewType::Impedance => true,
        }
    }

    /// Axis unit.
    pub fn unit(self) -> &'static str {
        match self {
            ViewType::Magnitude => "dB",
            ViewType::Phase => "°",
            ViewType::Vswr | ViewType::Impulse | ViewType::Step => "",
            ViewType::Impedance => "Ω",
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            ViewType::Magnitude => "Magnitude",
            ViewType::Phase => "Phase",
            ViewType::Vswr => "VSWR",
            ViewType::Impulse => "Impulse Response",
            ViewType::Step => "Step Response",
            ViewType::Impedance => "Impedance",
        }
    }
}

impl std::fmt::Display for ViewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Magnitude in dB.
pub fn magnitude_db(value: Complex64) -> f64 {
    20.0 * value.norm().log10()
}

/// Phase in degrees.
pub fn phase_deg(value: Complex64) -> f64 {
    value.arg().to_degrees()
}

/// `(1+|S|)/(1-|S|)`, NaN for `|S| >= 1`.
pub fn vswr(value: Complex64) -> f64 {
    let mag = value.norm();
    if mag < 1.0 {
        (1.0 + mag) / (1.0 - mag)
    } else {
        f64::NAN
    }
}

/// Impedance seen through a reflection coefficient, NaN for `|Γ| >= 1`.
pub fn impedance(step_response: f64) -> f64 {
    if step_response.abs() < 1.0 {
        REFERENCE_IMPEDANCE * (1.0 + step_response) / (1.0 - step_response)
    } else {
        f64::NAN
    }
}

/// Frequency-domain value of a sample; NaN for time-domain views.
pub fn frequency_value(view: ViewType, value: Complex64) -> f64 {
    match view {
        ViewType::Magnitude => magnitude_db(value),
        ViewType::Phase => phase_deg(value),
        ViewType::Vswr => vswr(value),
        ViewType::Impulse | ViewType::Step | ViewType::Impedance => f64::NAN,
    }
}

/// Time-domain value of a TDR point; NaN for frequency-domain views.
pub fn time_value(view: ViewType, point: &TdrPoint) -> f64 {
    match view {
        ViewType::Impulse => point.impulse_response,
        ViewType::Step => point.step_response,
        ViewType::Impedance => impedance(point.step_response),
        ViewType::Magnitude | ViewType::Phase | ViewType::Vswr => f64::NAN,
    }
}

/// Whether a trace can be shown in a view.
pub fn supported(trace: &Trace, view: ViewType) -> bool {
    match view {
        ViewType::Vswr => trace.is_reflection(),
        ViewType::Magnitude
        | ViewType::Phase
        | ViewType::Impulse
        | ViewType::Step
        | ViewType::Impedance => true,
    }
}

/// `(x, y)` points of a trace in a view.
///
/// The x axis is frequency in Hz for frequency views and time in seconds for
/// time-domain views. Unsupported combinations and time-domain views without a
/// computed TDR series yield an empty series.
pub fn series(trace: &Trace, view: ViewType) -> Vec<(f64, f64)> {
    if !supported(trace, view) {
        return Vec::new();
    }
    if view.is_time_domain() {
        trace
            .tdr()
            .iter()
            .map(|p| (p.time, time_value(view, p)))
            .collect()
    } else {
        trace
            .samples()
            .iter()
            .map(|s| (s.frequency, frequency_value(view, s.value)))
            .collect()
    }
}

/// Value of a trace in a view at `x` (frequency or time).
///
/// Time-domain lookups use the nearest TDR point at or after `x`.
pub fn value_at(trace: &Trace, view: ViewType, x: f64) -> f64 {
    if !supported(trace, view) {
        return f64::NAN;
    }
    if view.is_time_domain() {
        let tdr = trace.tdr();
        let idx = tdr.partition_point(|p| p.time < x);
        tdr.get(idx).map_or(f64::NAN, |p| time_value(view, p))
    } else {
        frequency_value(view, trace.query(x))
    }
}
