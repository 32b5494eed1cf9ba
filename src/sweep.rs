//! Sweep configuration with device-limit clamping.
//!
//! Interactive tuning is permissive: every setter silently clamps its input to the
//! [`DeviceLimits`] reported by the driver instead of rejecting it. A warning is
//! logged whenever a value had to be corrected.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Capability limits of the connected instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Lowest supported frequency in Hz
    pub min_freq: f64,
    /// Highest supported frequency in Hz
    pub max_freq: f64,
    /// Maximum number of points per sweep
    pub max_points: u32,
    /// Lowest IF bandwidth in Hz
    pub min_if_bandwidth: f64,
    /// Highest IF bandwidth in Hz
    pub max_if_bandwidth: f64,
    /// Lowest source level in dBm
    pub min_source_level: f64,
    /// Highest source level in dBm
    pub max_source_level: f64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_freq: 100_000.0,
            max_freq: 6_000_000_000.0,
            max_points: 4501,
            min_if_bandwidth: 10.0,
            max_if_bandwidth: 50_000.0,
            min_source_level: -42.0,
            max_source_level: -10.0,
        }
    }
}

impl DeviceLimits {
    /// Check that every lower bound is below its upper bound.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_freq > 0.0 && self.min_freq <= self.max_freq) {
            return Err(format!(
                "Invalid frequency limits {}..{} Hz",
                self.min_freq, self.max_freq
            ));
        }
        if self.max_points == 0 {
            return Err("max_points must be at least 1".to_string());
        }
        if !(self.min_if_bandwidth > 0.0 && self.min_if_bandwidth <= self.max_if_bandwidth) {
            return Err(format!(
                "Invalid IF bandwidth limits {}..{} Hz",
                self.min_if_bandwidth, self.max_if_bandwidth
            ));
        }
        if self.min_source_level > self.max_source_level {
            return Err(format!(
                "Invalid source level limits {}..{} dBm",
                self.min_source_level, self.max_source_level
            ));
        }
        Ok(())
    }
}

/// Settings that, when changed, make previously taken calibration standards unusable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepFingerprint {
    /// Points per sweep
    pub points: u32,
    /// Start frequency in Hz
    pub f_start: f64,
    /// Stop frequency in Hz
    pub f_stop: f64,
    /// IF bandwidth in Hz
    pub if_bandwidth: f64,
}

/// Current sweep configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Start frequency in Hz
    pub f_start: f64,
    /// Stop frequency in Hz
    pub f_stop: f64,
    /// Points per sweep
    pub points: u32,
    /// IF bandwidth in Hz
    pub if_bandwidth: f64,
    /// Stimulus level in dBm
    pub source_level_dbm: f64,
    /// Number of sweeps to average
    pub averages: u32,
    /// Excite port 1 during the sweep
    #[serde(default = "default_true")]
    pub excite_port1: bool,
    /// Excite port 2 during the sweep
    #[serde(default = "default_true")]
    pub excite_port2: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            f_start: 1_000_000.0,
            f_stop: 6_000_000_000.0,
            points: 501,
            if_bandwidth: 1_000.0,
            source_level_dbm: -10.0,
            averages: 1,
            excite_port1: true,
            excite_port2: true,
        }
    }
}

fn clamp_logged(name: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(setting = name, requested = value, applied = clamped, "Clamped to device limits");
    }
    clamped
}

impl SweepSettings {
    /// Fingerprint of the settings relevant to calibration validity.
    pub fn fingerprint(&self) -> SweepFingerprint {
        SweepFingerprint {
            points: self.points,
            f_start: self.f_start,
            f_stop: self.f_stop,
            if_bandwidth: self.if_bandwidth,
        }
    }

    /// Span in Hz.
    pub fn span(&self) -> f64 {
        self.f_stop - self.f_start
    }

    /// Center frequency in Hz.
    pub fn center(&self) -> f64 {
        (self.f_start + self.f_stop) / 2.0
    }

    /// Frequency of a point on the linear sweep grid.
    pub fn frequency_at(&self, point: u32) -> f64 {
        if self.points <= 1 {
            return self.f_start;
        }
        self.f_start + self.span() * point as f64 / (self.points - 1) as f64
    }

    /// Set start frequency; stop follows if it would lie below.
    pub fn set_start(&mut self, freq: f64, limits: &DeviceLimits) {
        self.f_start = freq;
        if self.f_stop < freq {
            self.f_stop = freq;
        }
        self.constrain_frequencies(limits);
    }

    /// Set stop frequency; start follows if it would lie above.
    pub fn set_stop(&mut self, freq: f64, limits: &DeviceLimits) {
        self.f_stop = freq;
        if self.f_start > freq {
            self.f_start = freq;
        }
        self.constrain_frequencies(limits);
    }

    /// Move the sweep to a new center, keeping the span where possible.
    pub fn set_center(&mut self, freq: f64, limits: &DeviceLimits) {
        let old_span = self.span();
        if freq > old_span / 2.0 {
            self.f_start = freq - old_span / 2.0;
            self.f_stop = freq + old_span / 2.0;
        } else {
            self.f_start = 0.0;
            self.f_stop = 2.0 * freq;
        }
        self.constrain_frequencies(limits);
    }

    /// Change the span around the current center.
    pub fn set_span(&mut self, span: f64, limits: &DeviceLimits) {
        let old_center = self.center();
        if old_center > span / 2.0 {
            self.f_start = old_center - span / 2.0;
        } else {
            self.f_start = 0.0;
        }
        self.f_stop = old_center + span / 2.0;
        self.constrain_frequencies(limits);
    }

    /// Sweep the full frequency range of the device.
    pub fn set_full_span(&mut self, limits: &DeviceLimits) {
        self.f_start = limits.min_freq;
        self.f_stop = limits.max_freq;
        self.constrain_frequencies(limits);
    }

    /// Halve the span around the center.
    pub fn zoom_in(&mut self, limits: &DeviceLimits) {
        let center = self.center();
        let old_span = self.span();
        self.f_start = center - old_span / 4.0;
        self.f_stop = center + old_span / 4.0;
        self.constrain_frequencies(limits);
    }

    /// Double the span around the center.
    pub fn zoom_out(&mut self, limits: &DeviceLimits) {
        let center = self.center();
        let old_span = self.span();
        if center > old_span {
            self.f_start = center - old_span;
        } else {
            self.f_start = 0.0;
        }
        self.f_stop = center + old_span;
        self.constrain_frequencies(limits);
    }

    /// Set stimulus level in dBm.
    pub fn set_source_level(&mut self, level_dbm: f64, limits: &DeviceLimits) {
        self.source_level_dbm = clamp_logged(
            "source_level",
            level_dbm,
            limits.min_source_level,
            limits.max_source_level,
        );
    }

    /// Set number of points per sweep.
    pub fn set_points(&mut self, points: u32, limits: &DeviceLimits) {
        let clamped = points.clamp(1, limits.max_points.max(1));
        if clamped != points {
            warn!(setting = "points", requested = points, applied = clamped, "Clamped to device limits");
        }
        self.points = clamped;
    }

    /// Set IF bandwidth in Hz.
    pub fn set_if_bandwidth(&mut self, bandwidth: f64, limits: &DeviceLimits) {
        self.if_bandwidth = clamp_logged(
            "if_bandwidth",
            bandwidth,
            limits.min_if_bandwidth,
            limits.max_if_bandwidth,
        );
    }

    /// Set number of sweeps to average (at least one).
    pub fn set_averages(&mut self, averages: u32) {
        self.averages = averages.max(1);
    }

    /// Clamp every field to the device limits.
    pub fn constrain(&mut self, limits: &DeviceLimits) {
        self.constrain_frequencies(limits);
        self.set_points(self.points, limits);
        self.set_if_bandwidth(self.if_bandwidth, limits);
        self.set_source_level(self.source_level_dbm, limits);
        self.set_averages(self.averages);
    }

    fn constrain_frequencies(&mut self, limits: &DeviceLimits) {
        if self.f_stop > limits.max_freq {
            self.f_stop = limits.max_freq;
        }
        if self.f_start > self.f_stop {
            self.f_start = self.f_stop;
        }
        if self.f_start < limits.min_freq {
            self.f_start = limits.min_freq;
        }
        if self.f_stop < self.f_start {
            self.f_stop = self.f_start;
        }
    }
}
