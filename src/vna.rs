//! Application root of the measurement core.
//!
//! [`Vna`] owns every stateful component (sweep settings, averager, calibration,
//! traces, markers) and the [`EventBus`] they report through. Each datapoint from
//! the instrument passes through one synchronous delivery step, in fixed order:
//!
//! 1. **Average** the raw point into the per-point running mean
//! 2. **Acquire** the averaged, uncorrected point if a calibration standard is
//!    being measured and this is the final averaging sweep
//! 3. **Correct** with the active error terms
//! 4. **Commit** to every live trace of the matching parameter
//! 5. **Notify** subscribers; after the last point of a sweep TDR series and
//!    rule-driven markers are refreshed first
//!
//! Averaging never sees calibrated data and calibration never sees un-averaged
//! noise.
//!
//! Any change of the sweep settings resets the averager and clears live traces
//! before the next point is accepted. If the change touches point count, span
//! or IF bandwidth, previously measured calibration standards and error terms
//! are discarded as well.
//!
//! # Example
//!
//! ```
//! use rust_vna::config::Settings;
//! use rust_vna::hardware::MockVna;
//! use rust_vna::vna::Vna;
//!
//! let mut settings = Settings::default();
//! settings.sweep.points = 51;
//! let mut vna = Vna::new(&settings);
//! let mut mock = MockVna::new(*vna.settings());
//! for dp in mock.sweep() {
//!     vna.deliver(dp);
//! }
//! let s11 = vna.traces().traces().next().unwrap();
//! assert_eq!(s11.len(), 51);
//! ```

use crate::calibration::{
    Calibration, CalibrationMeasurement, CalibrationType, ErrorTermSolver, IdealSolver,
};
use crate::config::{AcquisitionConfig, Settings};
use crate::data::averaging::SweepAverager;
use crate::data::markers::{MarkerId, MarkerModel, MarkerRule};
use crate::data::tdr::{FftTdr, TdrProvider};
use crate::data::trace::{LiveUpdatePolicy, Touchstone, Trace, TraceId};
use crate::data::trace_model::TraceModel;
use crate::data::transforms::{self, ViewType};
use crate::error::{AppResult, VnaError};
use crate::events::{EventBus, VnaEvent};
use crate::measurement_types::{LiveParameter, Sample, VnaDatapoint};
use crate::sweep::{DeviceLimits, SweepFingerprint, SweepSettings};
use num_complex::Complex64;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Colour of traces imported from calibration error terms.
const ERROR_TERM_COLOR: [u8; 3] = [128, 128, 128];

/// The measurement core.
pub struct Vna {
    settings: SweepSettings,
    limits: DeviceLimits,
    acquisition: AcquisitionConfig,
    averager: SweepAverager,
    calibration: Calibration,
    standards_fingerprint: Option<SweepFingerprint>,
    traces: TraceModel,
    markers: MarkerModel,
    tdr: Box<dyn TdrProvider>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for Vna {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vna")
            .field("settings", &self.settings)
            .field("calibration", &self.calibration)
            .field("traces", &self.traces.len())
            .field("markers", &self.markers.len())
            .finish()
    }
}

impl Vna {
    /// Core with default traces, the ideal-standard solver and FFT-based TDR.
    pub fn new(settings: &Settings) -> Self {
        let bus = Arc::new(EventBus::with_capacity(
            settings.acquisition.event_channel_capacity,
        ));
        Self::with_components(settings, bus, Box::new(IdealSolver), Box::new(FftTdr))
    }

    /// Core with injected collaborators.
    pub fn with_components(
        settings: &Settings,
        bus: Arc<EventBus>,
        solver: Box<dyn ErrorTermSolver>,
        tdr: Box<dyn TdrProvider>,
    ) -> Self {
        let sweep = settings.constrained_sweep();
        let mut vna = Self {
            settings: sweep,
            limits: settings.limits,
            acquisition: settings.acquisition.clone(),
            averager: SweepAverager::new(sweep.points as usize, sweep.averages),
            calibration: Calibration::new(solver),
            standards_fingerprint: None,
            traces: TraceModel::with_default_traces(),
            markers: MarkerModel::new(),
            tdr,
            bus,
        };
        vna.refresh_excitation();
        vna
    }

    /// Event bus all changes are published on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Active sweep settings.
    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Instrument limits the settings are clamped to.
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// All traces.
    pub fn traces(&self) -> &TraceModel {
        &self.traces
    }

    /// All markers.
    pub fn markers(&self) -> &MarkerModel {
        &self.markers
    }

    /// Calibration pipeline.
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Sweep averager.
    pub fn averager(&self) -> &SweepAverager {
        &self.averager
    }

    fn publish(&self, events: Vec<VnaEvent>) {
        self.bus.publish_all(events);
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Run one datapoint through the pipeline and publish the resulting events.
    ///
    /// Returns the committed (averaged, corrected) point, or `None` if the point
    /// index lies outside the configured sweep.
    pub fn deliver(&mut self, dp: VnaDatapoint) -> Option<VnaDatapoint> {
        let (committed, events) = self.process(dp);
        self.publish(events);
        committed
    }

    /// Delivery step without publishing.
    pub(crate) fn process(&mut self, dp: VnaDatapoint) -> (Option<VnaDatapoint>, Vec<VnaEvent>) {
        if dp.point_index >= self.settings.points {
            debug!(
                point = dp.point_index,
                points = self.settings.points,
                "Ignoring point outside sweep"
            );
            return (None, Vec::new());
        }

        let averaged = self.averager.process_datapoint(dp);
        let mut events = Vec::new();

        if self.calibration.measuring().is_some()
            && self.averager.current_sweep() == self.averager.requested_averages()
        {
            events.extend(self.calibration.add_measurement(&averaged));
        }

        let corrected = self.calibration.correct(&averaged);
        events.extend(self.traces.add_vna_data(&corrected));

        if dp.point_index + 1 == self.settings.points {
            events.extend(self.traces.update_tdr(self.tdr.as_ref()));
            events.extend(self.traces.update_markers(&mut self.markers));
            let level = self.averager.completed_level();
            debug!(
                averaging_level = level,
                averaging_target = self.settings.averages,
                "Sweep complete"
            );
            events.push(VnaEvent::SweepCompleted {
                averaging_level: level,
                averaging_target: self.settings.averages,
            });
        }
        (Some(corrected), events)
    }

    // ------------------------------------------------------------------
    // Sweep settings
    // ------------------------------------------------------------------

    fn apply_settings_change(&mut self) {
        let events = self.settings_changed();
        self.publish(events);
    }

    fn settings_changed(&mut self) -> Vec<VnaEvent> {
        self.averager.set_averages(self.settings.averages);
        self.averager.reset(self.settings.points as usize);
        let mut events = self.traces.clear_live_data();

        let fingerprint = self.settings.fingerprint();
        if self
            .standards_fingerprint
            .is_some_and(|fp| fp != fingerprint)
        {
            info!("Sweep changed, discarding calibration standards");
            events.extend(self.calibration.reset());
            self.standards_fingerprint = None;
        }

        events.push(VnaEvent::SweepSettingsChanged);
        events.push(VnaEvent::SpanChanged {
            start: self.settings.f_start,
            stop: self.settings.f_stop,
        });
        events
    }

    /// Replace the whole sweep configuration (clamped to the device limits).
    pub fn configure(&mut self, mut settings: SweepSettings) {
        settings.constrain(&self.limits);
        self.settings = settings;
        self.refresh_excitation();
        self.apply_settings_change();
    }

    /// Set the start frequency, keeping the stop.
    pub fn set_start(&mut self, freq: f64) {
        self.settings.set_start(freq, &self.limits);
        self.apply_settings_change();
    }

    /// Set the stop frequency, keeping the start.
    pub fn set_stop(&mut self, freq: f64) {
        self.settings.set_stop(freq, &self.limits);
        self.apply_settings_change();
    }

    /// Move the sweep, keeping the span.
    pub fn set_center(&mut self, freq: f64) {
        self.settings.set_center(freq, &self.limits);
        self.apply_settings_change();
    }

    /// Resize the sweep around its center.
    pub fn set_span(&mut self, span: f64) {
        self.settings.set_span(span, &self.limits);
        self.apply_settings_change();
    }

    /// Sweep the full instrument range.
    pub fn set_full_span(&mut self) {
        self.settings.set_full_span(&self.limits);
        self.apply_settings_change();
    }

    /// Halve the span.
    pub fn zoom_in(&mut self) {
        self.settings.zoom_in(&self.limits);
        self.apply_settings_change();
    }

    /// Double the span.
    pub fn zoom_out(&mut self) {
        self.settings.zoom_out(&self.limits);
        self.apply_settings_change();
    }

    /// Set the source power in dBm.
    pub fn set_source_level(&mut self, level_dbm: f64) {
        self.settings.set_source_level(level_dbm, &self.limits);
        self.apply_settings_change();
    }

    /// Set the number of points per sweep.
    pub fn set_points(&mut self, points: u32) {
        self.settings.set_points(points, &self.limits);
        self.apply_settings_change();
    }

    /// Set the IF bandwidth in Hz.
    pub fn set_if_bandwidth(&mut self, bandwidth: f64) {
        self.settings.set_if_bandwidth(bandwidth, &self.limits);
        self.apply_settings_change();
    }

    /// Set the number of sweeps averaged per point.
    pub fn set_averages(&mut self, averages: u32) {
        self.settings.set_averages(averages);
        self.apply_settings_change();
    }

    /// Recompute which ports must be excited. Returns true if that changed.
    fn refresh_excitation(&mut self) -> bool {
        let both = self.acquisition.always_excite_both_ports;
        let port1 = both || self.traces.port_excitation_required(1);
        let port2 = both || self.traces.port_excitation_required(2);
        if self.settings.excite_port1 == port1 && self.settings.excite_port2 == port2 {
            return false;
        }
        self.settings.excite_port1 = port1;
        self.settings.excite_port2 = port2;
        debug!(port1, port2, "Excitation changed");
        true
    }

    fn update_excitation(&mut self) {
        if self.refresh_excitation() {
            self.apply_settings_change();
        }
    }

    // ------------------------------------------------------------------
    // Calibration workflow
    // ------------------------------------------------------------------

    /// Start acquiring a calibration standard. The sweep restarts.
    pub fn start_calibration_measurement(&mut self, kind: CalibrationMeasurement) {
        let mut events = self.calibration.begin_measurement(
            kind,
            self.settings.points,
            self.acquisition.calibration_wait_first,
        );
        self.standards_fingerprint = Some(self.settings.fingerprint());
        info!(standard = %kind, "Taking calibration measurement");
        events.extend(self.settings_changed());
        self.publish(events);
    }

    /// Abort the measurement in progress, discarding only its partial data.
    pub fn cancel_calibration_measurement(&mut self) -> Option<CalibrationMeasurement> {
        self.calibration.cancel_measurement()
    }

    /// Progress of the measurement in progress, in percent.
    pub fn calibration_progress(&self) -> Option<u32> {
        self.calibration.measuring()?;
        let sweep = self.averager.current_sweep();
        if sweep == 0 {
            return Some(0);
        }
        let points = self.settings.points.max(1);
        let averages = self.settings.averages.max(1);
        let point = self.averager.current_point();
        Some(((sweep - 1) * 100 + (point + 1) * 100 / points) / averages)
    }

    /// Construct and activate a calibration.
    ///
    /// Missing standards or a solver failure leave the calibration disabled.
    /// Averaging restarts either way.
    pub fn apply_calibration(&mut self, calibration: CalibrationType) -> AppResult<()> {
        match self.calibration.construct(calibration) {
            Ok(events) => {
                self.averager.reset(self.settings.points as usize);
                self.publish(events);
                Ok(())
            }
            Err(err) => {
                match &err {
                    VnaError::MissingCalibrationStandards { missing, .. } => {
                        warn!(calibration = %calibration, missing = missing.len(), "Missing calibration standards");
                        self.averager.reset(self.settings.points as usize);
                        self.publish(vec![VnaEvent::CalibrationDisabled]);
                    }
                    VnaError::CalibrationSolverFailure(reason) => {
                        self.averager.reset(self.settings.points as usize);
                        self.publish(vec![
                            VnaEvent::CalibrationFailed {
                                reason: reason.clone(),
                            },
                            VnaEvent::CalibrationDisabled,
                        ]);
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Stop applying the calibration.
    pub fn disable_calibration(&mut self) {
        let events = self.calibration.disable();
        if !events.is_empty() {
            self.averager.reset(self.settings.points as usize);
        }
        self.publish(events);
    }

    /// Add one read-only trace per error term of the active calibration.
    pub fn import_error_terms_as_traces(&mut self) -> Vec<TraceId> {
        let mut ids = Vec::new();
        let mut events = Vec::new();
        for (name, samples) in self.calibration.error_term_traces() {
            let (id, added) = self
                .traces
                .add_trace(name, ERROR_TERM_COLOR, LiveParameter::S11);
            events.extend(added);
            if let Ok(trace) = self.traces.trace_mut(id) {
                events.extend(trace.fill_from_calibration(&samples));
            }
            ids.push(id);
        }
        self.publish(events);
        self.update_excitation();
        ids
    }

    // ------------------------------------------------------------------
    // Traces
    // ------------------------------------------------------------------

    /// Trace by id.
    pub fn trace(&self, id: TraceId) -> AppResult<&Trace> {
        self.traces.trace(id)
    }

    /// Add a live trace following `parameter`.
    pub fn add_trace(&mut self, name: impl Into<String>, color: [u8; 3], parameter: LiveParameter) -> TraceId {
        let (id, events) = self.traces.add_trace(name, color, parameter);
        self.publish(events);
        self.update_excitation();
        id
    }

    /// Remove a trace together with its markers.
    pub fn remove_trace(&mut self, id: TraceId) -> AppResult<()> {
        let events = self.traces.remove_trace(id, &mut self.markers)?;
        self.publish(events);
        self.update_excitation();
        Ok(())
    }

    /// Fill a trace from one parameter of a touchstone data set.
    pub fn import_touchstone(
        &mut self,
        id: TraceId,
        touchstone: &Touchstone,
        parameter: usize,
        filename: &str,
    ) -> AppResult<()> {
        let mut events = self
            .traces
            .trace_mut(id)?
            .fill_from_touchstone(touchstone, parameter, filename)?;
        events.extend(self.markers.update_markers(self.traces.trace(id)?));
        self.publish(events);
        self.update_excitation();
        Ok(())
    }

    /// Make a trace follow live data again.
    pub fn set_trace_live(&mut self, id: TraceId, policy: LiveUpdatePolicy, parameter: LiveParameter) -> AppResult<()> {
        let events = self.traces.trace_mut(id)?.from_livedata(policy, parameter);
        self.publish(events);
        self.update_excitation();
        Ok(())
    }

    /// Change the live update policy of a trace.
    pub fn set_trace_policy(&mut self, id: TraceId, policy: LiveUpdatePolicy) -> AppResult<()> {
        let events = self.traces.trace_mut(id)?.set_policy(policy);
        self.publish(events);
        Ok(())
    }

    /// Rename a trace.
    pub fn set_trace_name(&mut self, id: TraceId, name: &str) -> AppResult<()> {
        let events = self.traces.trace_mut(id)?.set_name(name);
        self.publish(events);
        Ok(())
    }

    /// Change the colour of a trace.
    pub fn set_trace_color(&mut self, id: TraceId, color: [u8; 3]) -> AppResult<()> {
        let events = self.traces.trace_mut(id)?.set_color(color);
        self.publish(events);
        Ok(())
    }

    /// Show or hide a trace.
    pub fn set_trace_visible(&mut self, id: TraceId, visible: bool) -> AppResult<()> {
        let events = self.traces.trace_mut(id)?.set_visible(visible);
        self.publish(events);
        self.update_excitation();
        Ok(())
    }

    /// Freeze a trace.
    pub fn pause_trace(&mut self, id: TraceId) -> AppResult<()> {
        self.traces.trace_mut(id)?.pause();
        self.update_excitation();
        Ok(())
    }

    /// Unfreeze a trace.
    pub fn resume_trace(&mut self, id: TraceId) -> AppResult<()> {
        self.traces.trace_mut(id)?.resume();
        self.update_excitation();
        Ok(())
    }

    /// Remove all samples of a trace.
    pub fn clear_trace(&mut self, id: TraceId) -> AppResult<()> {
        let events = self.traces.trace_mut(id)?.clear();
        self.publish(events);
        Ok(())
    }

    /// Register a time-domain consumer; the series is computed right away.
    pub fn add_tdr_interest(&mut self, id: TraceId) -> AppResult<()> {
        let trace = self.traces.trace_mut(id)?;
        trace.add_tdr_interest();
        let events = trace.update_tdr(self.tdr.as_ref());
        self.publish(events);
        Ok(())
    }

    /// Drop a time-domain consumer of a trace.
    pub fn remove_tdr_interest(&mut self, id: TraceId) -> AppResult<()> {
        self.traces.trace_mut(id)?.remove_tdr_interest();
        Ok(())
    }

    /// `(x, y)` points of a trace in a view.
    pub fn series(&self, id: TraceId, view: ViewType) -> AppResult<Vec<(f64, f64)>> {
        Ok(transforms::series(self.traces.trace(id)?, view))
    }

    /// Peak frequencies of a trace.
    pub fn find_peaks(
        &self,
        id: TraceId,
        max_peaks: usize,
        min_level_dbm: f64,
        min_valley_db: f64,
    ) -> AppResult<Vec<f64>> {
        Ok(self
            .traces
            .trace(id)?
            .find_peaks(max_peaks, min_level_dbm, min_valley_db))
    }

    // ------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------

    /// Place a manual marker on a trace.
    pub fn add_marker(&mut self, trace: TraceId, frequency: f64) -> AppResult<MarkerId> {
        self.traces.trace(trace)?;
        let (id, events) = self.markers.add(trace, frequency);
        self.publish(events);
        Ok(id)
    }

    /// Delete a marker.
    pub fn remove_marker(&mut self, id: MarkerId) -> AppResult<()> {
        let events = self.markers.remove(id)?;
        self.publish(events);
        Ok(())
    }

    /// Move a marker; rule-driven markers become manual.
    pub fn set_marker_frequency(&mut self, id: MarkerId, frequency: f64) -> AppResult<()> {
        let events = self.markers.set_frequency(id, frequency)?;
        self.publish(events);
        Ok(())
    }

    /// Change how a marker picks its frequency.
    pub fn set_marker_rule(&mut self, id: MarkerId, rule: MarkerRule) -> AppResult<()> {
        let marker = self.markers.get(id).ok_or(VnaError::UnknownMarker(id))?;
        let trace = self.traces.trace(marker.trace)?;
        let events = self.markers.set_rule(id, rule, trace)?;
        self.publish(events);
        Ok(())
    }

    /// Complex trace value under a marker.
    pub fn marker_value(&self, id: MarkerId) -> AppResult<Complex64> {
        let marker = self.markers.get(id).ok_or(VnaError::UnknownMarker(id))?;
        self.markers.value(id, self.traces.trace(marker.trace)?)
    }

    /// Marker value transformed for a view.
    pub fn marker_display_value(&self, id: MarkerId, view: ViewType) -> AppResult<f64> {
        let marker = self.markers.get(id).ok_or(VnaError::UnknownMarker(id))?;
        self.markers
            .display_value(id, self.traces.trace(marker.trace)?, view)
    }
}

/// Thread-safe handle for delivering on a driver thread while readers run elsewhere.
///
/// The whole delivery step runs under the write lock, so readers never observe
/// a partially committed point. Events are published after the lock is
/// released; synchronous handlers may therefore read through this handle.
#[derive(Clone, Debug)]
pub struct SharedVna(Arc<RwLock<Vna>>);

impl SharedVna {
    /// Share `vna` between threads.
    pub fn new(vna: Vna) -> Self {
        Self(Arc::new(RwLock::new(vna)))
    }

    /// Deliver one datapoint.
    pub fn deliver(&self, dp: VnaDatapoint) -> Option<VnaDatapoint> {
        let (committed, events, bus) = {
            let mut vna = self.0.write();
            let (committed, events) = vna.process(dp);
            (committed, events, vna.bus().clone())
        };
        bus.publish_all(events);
        committed
    }

    /// Copy of a trace's samples.
    pub fn snapshot(&self, id: TraceId) -> AppResult<Vec<Sample>> {
        Ok(self.0.read().trace(id)?.samples().to_vec())
    }

    /// Lower-bound query on a trace.
    pub fn query(&self, id: TraceId, frequency: f64) -> AppResult<Complex64> {
        Ok(self.0.read().trace(id)?.query(frequency))
    }

    /// Read access to the core.
    pub fn read(&self) -> RwLockReadGuard<'_, Vna> {
        self.0.read()
    }

    /// Exclusive access for settings and workflow operations.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vna> {
        self.0.write()
    }
}
