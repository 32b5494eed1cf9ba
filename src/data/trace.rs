//! Frequency-keyed measurement series (the trace store).
//!
//! A [`Trace`] owns a strictly ascending sequence of [`Sample`]s with at most one
//! sample per frequency. New samples are placed by binary search; when a sample
//! already exists at the same frequency the trace's [`LiveUpdatePolicy`] decides
//! whether it is replaced.
//!
//! Every mutator returns the [`VnaEvent`]s it caused. A mutation that changed
//! nothing (paused trace, losing hold comparison, unchanged colour) returns an
//! empty list.
//!
//! # Example
//!
//! ```
//! use num_complex::Complex64;
//! use rust_vna::data::trace::{LiveUpdatePolicy, Trace, TraceId};
//! use rust_vna::measurement_types::{LiveParameter, Sample};
//!
//! let mut trace = Trace::new(TraceId(1), "S21", [0, 255, 0], LiveParameter::S21);
//! trace.set_policy(LiveUpdatePolicy::MaxHold);
//! trace.add_sample(Sample::new(1.0e6, Complex64::new(0.5, 0.0))).unwrap();
//! trace.add_sample(Sample::new(1.0e6, Complex64::new(0.1, 0.0))).unwrap();
//! assert_eq!(trace.query(1.0e6), Complex64::new(0.5, 0.0));
//! assert!(trace.query(2.0e6).is_nan());
//! ```

use crate::data::peaks;
use crate::data::tdr::{TdrPoint, TdrProvider};
use crate::error::{AppResult, VnaError};
use crate::events::VnaEvent;
use crate::measurement_types::{LiveParameter, Sample};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identity of a trace within a [`TraceModel`](crate::data::trace_model::TraceModel).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceId(pub u32);

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a new sample resolves against an existing one at the same frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LiveUpdatePolicy {
    /// Replace unconditionally
    #[default]
    Overwrite,
    /// Replace only if the new magnitude is larger
    MaxHold,
    /// Replace only if the new magnitude is smaller
    MinHold,
}

impl LiveUpdatePolicy {
    fn replaces(self, old: &Sample, new: &Sample) -> bool {
        match self {
            LiveUpdatePolicy::Overwrite => true,
            LiveUpdatePolicy::MaxHold => new.magnitude() > old.magnitude(),
            LiveUpdatePolicy::MinHold => new.magnitude() < old.magnitude(),
        }
    }
}

/// Where the samples of a trace come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOrigin {
    /// Streamed from the instrument
    Live,
    /// Imported once from a touchstone file
    Touchstone,
    /// Imported once from calibration error terms
    Calibration,
}

/// One frequency point of a touchstone data set: `ports²` values in row-major
/// order (S11, S12, ..., S21, S22, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TouchstonePoint {
    /// Frequency in Hz
    pub frequency: f64,
    /// S-matrix values, row-major
    pub s: Vec<Complex64>,
}

/// Parsed contents of a touchstone file. Parsing itself is done by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Touchstone {
    /// Number of ports
    pub ports: usize,
    /// Data points
    pub points: Vec<TouchstonePoint>,
}

impl Touchstone {
    /// Empty data set for `ports` ports.
    pub fn new(ports: usize) -> Self {
        Self {
            ports,
            points: Vec::new(),
        }
    }

    /// Append a point.
    pub fn add_point(&mut self, frequency: f64, s: Vec<Complex64>) {
        self.points.push(TouchstonePoint { frequency, s });
    }
}

/// Whether a 1-based parameter index lies on the S-matrix diagonal.
fn is_perfect_square(n: usize) -> bool {
    let mut root = 0usize;
    while root * root < n {
        root += 1;
    }
    root * root == n
}

/// An ordered, frequency-keyed measurement series with metadata.
#[derive(Clone, Debug)]
pub struct Trace {
    id: TraceId,
    name: String,
    color: [u8; 3],
    parameter: LiveParameter,
    policy: LiveUpdatePolicy,
    samples: Vec<Sample>,
    paused: bool,
    origin: TraceOrigin,
    reflection: bool,
    visible: bool,
    touchstone_file: Option<String>,
    touchstone_parameter: usize,
    tdr_interest: u32,
    tdr: Vec<TdrPoint>,
}

impl Trace {
    /// New, empty live trace with overwrite policy.
    pub fn new(id: TraceId, name: impl Into<String>, color: [u8; 3], parameter: LiveParameter) -> Self {
        Self {
            id,
            name: name.into(),
            color,
            parameter,
            policy: LiveUpdatePolicy::Overwrite,
            samples: Vec::new(),
            paused: false,
            origin: TraceOrigin::Live,
            reflection: parameter.is_reflection(),
            visible: true,
            touchstone_file: None,
            touchstone_parameter: 0,
            tdr_interest: 0,
            tdr: Vec::new(),
        }
    }

    /// Identity within the owning model.
    pub fn id(&self) -> TraceId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display colour as RGB.
    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    /// S-parameter followed while live.
    pub fn parameter(&self) -> LiveParameter {
        self.parameter
    }

    /// Live update policy.
    pub fn policy(&self) -> LiveUpdatePolicy {
        self.policy
    }

    /// Where the samples come from.
    pub fn origin(&self) -> TraceOrigin {
        self.origin
    }

    /// Whether the trace follows instrument data.
    pub fn is_live(&self) -> bool {
        self.origin == TraceOrigin::Live
    }

    /// Whether the trace holds an imported error term.
    pub fn is_calibration(&self) -> bool {
        self.origin == TraceOrigin::Calibration
    }

    /// Reflection traces lie on the S-matrix diagonal and may be shown as VSWR.
    pub fn is_reflection(&self) -> bool {
        self.reflection
    }

    /// Whether the trace is shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether adds and clears are currently ignored.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Source file of an imported touchstone trace.
    pub fn touchstone_file(&self) -> Option<&str> {
        self.touchstone_file.as_deref()
    }

    /// 0-based parameter index used for the touchstone import.
    pub fn touchstone_parameter(&self) -> usize {
        self.touchstone_parameter
    }

    /// Committed samples, ascending by frequency.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Lowest stored frequency, NaN if empty.
    pub fn min_freq(&self) -> f64 {
        self.samples.first().map_or(f64::NAN, |s| s.frequency)
    }

    /// Highest stored frequency, NaN if empty.
    pub fn max_freq(&self) -> f64 {
        self.samples.last().map_or(f64::NAN, |s| s.frequency)
    }

    /// Add one streamed sample to a live trace.
    ///
    /// Samples whose frequency is not a positive finite number are dropped
    /// without events.
    pub fn add_sample(&mut self, sample: Sample) -> AppResult<Vec<VnaEvent>> {
        if !self.is_live() {
            return Err(VnaError::ReadOnlyTrace(self.id));
        }
        if self.paused {
            return Ok(Vec::new());
        }
        Ok(self.insert(sample))
    }

    fn insert(&mut self, sample: Sample) -> Vec<VnaEvent> {
        if !(sample.frequency.is_finite() && sample.frequency > 0.0) {
            debug!(trace = %self.id, frequency = sample.frequency, "Dropping sample with invalid frequency");
            return Vec::new();
        }
        let idx = self
            .samples
            .partition_point(|s| s.frequency < sample.frequency);
        match self.samples.get_mut(idx) {
            Some(existing) if existing.frequency == sample.frequency => {
                if !self.policy.replaces(existing, &sample) {
                    return Vec::new();
                }
                *existing = sample;
            }
            _ => self.samples.insert(idx, sample),
        }
        vec![
            VnaEvent::SampleAdded {
                trace: self.id,
                sample,
            },
            VnaEvent::TraceDataChanged(self.id),
        ]
    }

    /// Remove all samples. No-op while paused.
    pub fn clear(&mut self) -> Vec<VnaEvent> {
        if self.paused {
            return Vec::new();
        }
        self.samples.clear();
        self.tdr.clear();
        vec![
            VnaEvent::TraceCleared(self.id),
            VnaEvent::TraceDataChanged(self.id),
        ]
    }

    /// Value at the nearest stored frequency at or above `frequency`.
    ///
    /// NaN if the trace is empty or `frequency` lies outside the stored range.
    pub fn query(&self, frequency: f64) -> Complex64 {
        let nan = Complex64::new(f64::NAN, f64::NAN);
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return nan;
        };
        if !(frequency >= first.frequency && frequency <= last.frequency) {
            return nan;
        }
        let idx = self.samples.partition_point(|s| s.frequency < frequency);
        self.samples.get(idx).map_or(nan, |s| s.value)
    }

    /// Sample at the nearest stored frequency at or above `frequency`.
    pub fn sample_at(&self, frequency: f64) -> Option<&Sample> {
        let idx = self.samples.partition_point(|s| s.frequency < frequency);
        self.samples.get(idx)
    }

    /// Replace the contents with one parameter of a touchstone data set.
    ///
    /// `parameter` is the 0-based row-major index into the S-matrix. Fails without
    /// touching the trace if it is not below `ports²`.
    pub fn fill_from_touchstone(
        &mut self,
        touchstone: &Touchstone,
        parameter: usize,
        filename: impl Into<String>,
    ) -> AppResult<Vec<VnaEvent>> {
        let ports = touchstone.ports;
        if parameter >= ports * ports
            || touchstone.points.iter().any(|p| p.s.len() <= parameter)
        {
            return Err(VnaError::InvalidParameterIndex { parameter, ports });
        }

        self.paused = false;
        let mut events = self.clear();
        self.origin = TraceOrigin::Touchstone;
        self.touchstone_file = Some(filename.into());
        self.touchstone_parameter = parameter;
        self.reflection = is_perfect_square(parameter + 1);
        for point in &touchstone.points {
            // Bulk import reports a single data change below
            self.insert(Sample::new(point.frequency, point.s[parameter]));
        }
        debug!(
            trace = %self.id,
            parameter,
            points = self.samples.len(),
            "Imported touchstone data"
        );
        events.push(VnaEvent::TraceTypeChanged(self.id));
        events.push(VnaEvent::TraceDataChanged(self.id));
        Ok(events)
    }

    /// Replace the contents with a calibration error-term series.
    pub fn fill_from_calibration(&mut self, samples: &[Sample]) -> Vec<VnaEvent> {
        self.paused = false;
        let mut events = self.clear();
        self.origin = TraceOrigin::Calibration;
        self.reflection = false;
        self.touchstone_file = None;
        for sample in samples {
            self.insert(*sample);
        }
        events.push(VnaEvent::TraceTypeChanged(self.id));
        events.push(VnaEvent::TraceDataChanged(self.id));
        events
    }

    /// Turn this trace into a live trace following `parameter`.
    pub fn from_livedata(&mut self, policy: LiveUpdatePolicy, parameter: LiveParameter) -> Vec<VnaEvent> {
        self.origin = TraceOrigin::Live;
        self.touchstone_file = None;
        self.policy = policy;
        self.parameter = parameter;
        self.reflection = parameter.is_reflection();
        let mut events = self.clear();
        events.push(VnaEvent::TraceTypeChanged(self.id));
        events
    }

    /// Change the live update policy. Existing samples are kept.
    pub fn set_policy(&mut self, policy: LiveUpdatePolicy) -> Vec<VnaEvent> {
        if self.policy == policy {
            return Vec::new();
        }
        self.policy = policy;
        vec![VnaEvent::TraceTypeChanged(self.id)]
    }

    /// Rename the trace.
    pub fn set_name(&mut self, name: impl Into<String>) -> Vec<VnaEvent> {
        self.name = name.into();
        vec![VnaEvent::TraceNameChanged(self.id)]
    }

    /// Change the display colour.
    pub fn set_color(&mut self, color: [u8; 3]) -> Vec<VnaEvent> {
        if self.color == color {
            return Vec::new();
        }
        self.color = color;
        vec![VnaEvent::TraceColorChanged(self.id)]
    }

    /// Show or hide the trace.
    pub fn set_visible(&mut self, visible: bool) -> Vec<VnaEvent> {
        if self.visible == visible {
            return Vec::new();
        }
        self.visible = visible;
        vec![VnaEvent::TraceVisibilityChanged(self.id)]
    }

    /// Freeze the trace: adds and clears become no-ops.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Undo [`Trace::pause`].
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Register a consumer of the time-domain series.
    pub fn add_tdr_interest(&mut self) {
        self.tdr_interest += 1;
    }

    /// Drop a consumer; the cached series is released with the last one.
    pub fn remove_tdr_interest(&mut self) {
        self.tdr_interest = self.tdr_interest.saturating_sub(1);
        if self.tdr_interest == 0 {
            self.tdr.clear();
        }
    }

    /// Number of registered time-domain consumers.
    pub fn tdr_interest(&self) -> u32 {
        self.tdr_interest
    }

    /// Cached time-domain series, empty unless someone registered interest.
    pub fn tdr(&self) -> &[TdrPoint] {
        &self.tdr
    }

    /// Recompute the time-domain series if anyone is interested.
    pub fn update_tdr(&mut self, provider: &dyn TdrProvider) -> Vec<VnaEvent> {
        if self.tdr_interest == 0 {
            return Vec::new();
        }
        self.tdr = provider.compute(&self.samples);
        vec![VnaEvent::TraceDataChanged(self.id)]
    }

    /// Frequency of the global magnitude maximum (or minimum), 0 if empty.
    pub fn find_extremum_freq(&self, find_maximum: bool) -> f64 {
        peaks::find_extremum_freq(&self.samples, find_maximum)
    }

    /// Peak frequencies, see [`peaks::find_peaks`].
    pub fn find_peaks(&self, max_peaks: usize, min_level_dbm: f64, min_valley_db: f64) -> Vec<f64> {
        peaks::find_peaks(&self.samples, max_peaks, min_level_dbm, min_valley_db)
    }
}
