//! Calibration pipeline.
//!
//! Two halves share one [`Calibration`] value:
//!
//! - **Correction**: while [`CalibrationState::Valid`], every datapoint passes
//!   through the error terms' point-indexed correction before it reaches a
//!   trace. In every other state correction is the identity.
//! - **Acquisition**: while [`CalibrationState::MeasuringStandard`], raw
//!   (averaged, uncorrected) datapoints of the final averaging sweep are stored
//!   for that standard. The standard is complete once the last point of the
//!   sweep arrived.
//!
//! Error-term construction is delegated to an [`ErrorTermSolver`]; the pipeline
//! only sees the resulting [`ErrorTerms`] through its correction interface.
//!
//! ## State transitions
//!
//! ```text
//! Disabled ──begin_measurement──▶ MeasuringStandard(k) ──last point──▶ Disabled
//!     │                                    │
//!     │                                 cancel
//!     ▼                                    ▼
//! Computing ──solver ok──▶ Valid(terms)  Disabled
//!     │
//!     └──solver error──▶ Disabled
//! ```

pub mod solver;

pub use solver::IdealSolver;

use crate::error::{AppResult, VnaError};
use crate::events::VnaEvent;
use crate::measurement_types::{Sample, VnaDatapoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A calibration standard measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CalibrationMeasurement {
    /// Open standard at port 1
    Port1Open,
    /// Short standard at port 1
    Port1Short,
    /// Matched load at port 1
    Port1Load,
    /// Open standard at port 2
    Port2Open,
    /// Short standard at port 2
    Port2Short,
    /// Matched load at port 2
    Port2Load,
    /// Ports 1 and 2 connected directly
    Through,
    /// Both ports terminated
    Isolation,
}

impl CalibrationMeasurement {
    /// Every standard, in acquisition order.
    pub const ALL: [CalibrationMeasurement; 8] = [
        CalibrationMeasurement::Port1Open,
        CalibrationMeasurement::Port1Short,
        CalibrationMeasurement::Port1Load,
        CalibrationMeasurement::Port2Open,
        CalibrationMeasurement::Port2Short,
        CalibrationMeasurement::Port2Load,
        CalibrationMeasurement::Through,
        CalibrationMeasurement::Isolation,
    ];

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationMeasurement::Port1Open => "Port 1 Open",
            CalibrationMeasurement::Port1Short => "Port 1 Short",
            CalibrationMeasurement::Port1Load => "Port 1 Load",
            CalibrationMeasurement::Port2Open => "Port 2 Open",
            CalibrationMeasurement::Port2Short => "Port 2 Short",
            CalibrationMeasurement::Port2Load => "Port 2 Load",
            CalibrationMeasurement::Through => "Through",
            CalibrationMeasurement::Isolation => "Isolation",
        }
    }
}

impl std::fmt::Display for CalibrationMeasurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of error model to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationType {
    /// One-port short/open/load at port 1
    Port1Sol,
    /// One-port short/open/load at port 2
    Port2Sol,
    /// Two-port short/open/load/through with isolation (12-term)
    FullSolt,
    /// Through-only normalisation of S21/S12
    TransmissionNormalization,
}

impl CalibrationType {
    /// Every supported calibration.
    pub const ALL: [CalibrationType; 4] = [
        CalibrationType::Port1Sol,
        CalibrationType::Port2Sol,
        CalibrationType::FullSolt,
        CalibrationType::TransmissionNormalization,
    ];

    /// Standards that must be measured before construction.
    pub fn required_measurements(self) -> &'static [CalibrationMeasurement] {
        use CalibrationMeasurement::*;
        match self {
            CalibrationType::Port1Sol => &[Port1Open, Port1Short, Port1Load],
            CalibrationType::Port2Sol => &[Port2Open, Port2Short, Port2Load],
            CalibrationType::FullSolt => &[
                Port1Open, Port1Short, Port1Load, Port2Open, Port2Short, Port2Load, Through,
                Isolation,
            ],
            CalibrationType::TransmissionNormalization => &[Through],
        }
    }

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationType::Port1Sol => "Port 1 SOL",
            CalibrationType::Port2Sol => "Port 2 SOL",
            CalibrationType::FullSolt => "Full SOLT",
            CalibrationType::TransmissionNormalization => "Transmission Normalization",
        }
    }
}

impl std::fmt::Display for CalibrationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured standards, keyed by kind, in point order.
pub type MeasurementSet = BTreeMap<CalibrationMeasurement, Vec<VnaDatapoint>>;

/// Computed correction coefficients.
pub trait ErrorTerms: Send + Sync + std::fmt::Debug {
    /// Error model these terms implement.
    fn calibration_type(&self) -> CalibrationType;

    /// Correct one datapoint. Deterministic and side-effect free; points outside
    /// the calibrated sweep pass through unchanged.
    fn correct(&self, dp: &VnaDatapoint) -> VnaDatapoint;

    /// Named per-frequency series of the individual terms, for display.
    fn error_term_traces(&self) -> Vec<(String, Vec<Sample>)>;
}

/// Builds [`ErrorTerms`] from measured standards.
pub trait ErrorTermSolver: Send + Sync {
    /// Construct terms for `calibration`. All required standards are present.
    fn solve(
        &self,
        calibration: CalibrationType,
        measurements: &MeasurementSet,
    ) -> Result<Box<dyn ErrorTerms>, String>;
}

/// Pipeline state.
#[derive(Debug, Default)]
pub enum CalibrationState {
    /// Correction is the identity
    #[default]
    Disabled,
    /// Acquiring a standard; correction is the identity
    MeasuringStandard(CalibrationMeasurement),
    /// Solver running
    Computing,
    /// Correction active
    Valid(Box<dyn ErrorTerms>),
}

#[derive(Debug, Clone, Copy)]
struct Acquisition {
    kind: CalibrationMeasurement,
    total_points: u32,
    wait_first: bool,
}

/// Correction and acquisition state.
pub struct Calibration {
    state: CalibrationState,
    acquisition: Option<Acquisition>,
    measurements: MeasurementSet,
    completed: BTreeSet<CalibrationMeasurement>,
    solver: Box<dyn ErrorTermSolver>,
}

impl std::fmt::Debug for Calibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibration")
            .field("state", &self.state)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(Box::new(IdealSolver))
    }
}

impl Calibration {
    /// Disabled pipeline that builds error terms with `solver`.
    pub fn new(solver: Box<dyn ErrorTermSolver>) -> Self {
        Self {
            state: CalibrationState::Disabled,
            acquisition: None,
            measurements: BTreeMap::new(),
            completed: BTreeSet::new(),
            solver,
        }
    }

    /// Current pipeline state.
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Whether error terms are being applied.
    pub fn is_valid(&self) -> bool {
        matches!(self.state, CalibrationState::Valid(_))
    }

    /// Type of the applied calibration, if valid.
    pub fn active_type(&self) -> Option<CalibrationType> {
        match &self.state {
            CalibrationState::Valid(terms) => Some(terms.calibration_type()),
            _ => None,
        }
    }

    /// Standard currently being acquired.
    pub fn measuring(&self) -> Option<CalibrationMeasurement> {
        match self.state {
            CalibrationState::MeasuringStandard(kind) => Some(kind),
            _ => None,
        }
    }

    /// Apply the error terms. Identity unless the calibration is valid.
    pub fn correct(&self, dp: &VnaDatapoint) -> VnaDatapoint {
        match &self.state {
            CalibrationState::Valid(terms) => terms.correct(dp),
            _ => *dp,
        }
    }

    /// Arm acquisition of `kind` over a sweep of `total_points` points.
    ///
    /// Previously measured data of `kind` is discarded. With `wait_first`, points
    /// are ignored until the next sweep starts at point 0. Active error terms
    /// are dropped.
    pub fn begin_measurement(
        &mut self,
        kind: CalibrationMeasurement,
        total_points: u32,
        wait_first: bool,
    ) -> Vec<VnaEvent> {
        let events = self.disable();
        self.clear_measurement(kind);
        self.state = CalibrationState::MeasuringStandard(kind);
        self.acquisition = Some(Acquisition {
            kind,
            total_points,
            wait_first,
        });
        debug!(standard = %kind, total_points, wait_first, "Calibration measurement armed");
        events
    }

    /// Store one raw point of the standard being measured.
    ///
    /// Returns `CalibrationMeasurementComplete` once the last point of the sweep
    /// was stored. Points are ignored when no acquisition is armed, while
    /// waiting for the start of a sweep, or when their index lies outside the
    /// armed sweep.
    pub fn add_measurement(&mut self, dp: &VnaDatapoint) -> Vec<VnaEvent> {
        let Some(acq) = self.acquisition.as_mut() else {
            return Vec::new();
        };
        if dp.point_index >= acq.total_points {
            debug!(point = dp.point_index, total_points = acq.total_points, "Ignoring point outside calibration sweep");
            return Vec::new();
        }
        if acq.wait_first && dp.point_index != 0 {
            return Vec::new();
        }
        acq.wait_first = false;
        let acq = *acq;

        let data = self.measurements.entry(acq.kind).or_default();
        if dp.point_index == 0 {
            // A new sweep replaces any partial one
            data.clear();
        }
        data.push(*dp);

        if dp.point_index == acq.total_points - 1 {
            self.completed.insert(acq.kind);
            self.acquisition = None;
            self.state = CalibrationState::Disabled;
            info!(standard = %acq.kind, points = acq.total_points, "Calibration measurement complete");
            return vec![VnaEvent::CalibrationMeasurementComplete(acq.kind)];
        }
        Vec::new()
    }

    /// Discard measured data of `kind`. Aborts its acquisition if in progress.
    pub fn clear_measurement(&mut self, kind: CalibrationMeasurement) {
        self.measurements.remove(&kind);
        self.completed.remove(&kind);
        if self.measuring() == Some(kind) {
            self.acquisition = None;
            self.state = CalibrationState::Disabled;
        }
    }

    /// Abort the acquisition in progress, keeping other standards.
    pub fn cancel_measurement(&mut self) -> Option<CalibrationMeasurement> {
        let kind = self.measuring()?;
        self.clear_measurement(kind);
        info!(standard = %kind, "Calibration measurement cancelled");
        Some(kind)
    }

    /// Whether `kind` has a complete sweep.
    pub fn is_measured(&self, kind: CalibrationMeasurement) -> bool {
        self.completed.contains(&kind)
    }

    /// Stored points of `kind` (possibly partial).
    pub fn measurement(&self, kind: CalibrationMeasurement) -> &[VnaDatapoint] {
        self.measurements.get(&kind).map_or(&[], |v| v.as_slice())
    }

    /// Required standards of `calibration` not yet measured.
    pub fn missing_measurements(&self, calibration: CalibrationType) -> Vec<CalibrationMeasurement> {
        calibration
            .required_measurements()
            .iter()
            .copied()
            .filter(|m| !self.completed.contains(m))
            .collect()
    }

    /// Whether every required standard of `calibration` is measured.
    pub fn calculation_possible(&self, calibration: CalibrationType) -> bool {
        self.missing_measurements(calibration).is_empty()
    }

    /// Build error terms for `calibration` and make them active.
    ///
    /// Fails without attempting anything if standards are missing. A solver
    /// failure forces the state back to `Disabled`.
    pub fn construct(&mut self, calibration: CalibrationType) -> AppResult<Vec<VnaEvent>> {
        if let Some(kind) = self.measuring() {
            return Err(VnaError::CalibrationBusy(kind));
        }
        let missing = self.missing_measurements(calibration);
        if !missing.is_empty() {
            self.state = CalibrationState::Disabled;
            return Err(VnaError::MissingCalibrationStandards {
                calibration,
                missing,
            });
        }

        self.state = CalibrationState::Computing;
        let required: MeasurementSet = calibration
            .required_measurements()
            .iter()
            .filter_map(|m| self.measurements.get(m).map(|d| (*m, d.clone())))
            .collect();
        match self.solver.solve(calibration, &required) {
            Ok(terms) => {
                info!(calibration = %calibration, "Calibration applied");
                self.state = CalibrationState::Valid(terms);
                Ok(vec![VnaEvent::CalibrationApplied(calibration)])
            }
            Err(reason) => {
                warn!(calibration = %calibration, %reason, "Calibration failure");
                self.state = CalibrationState::Disabled;
                Err(VnaError::CalibrationSolverFailure(reason))
            }
        }
    }

    /// Stop applying the error terms. Returns `CalibrationDisabled` if they were.
    pub fn disable(&mut self) -> Vec<VnaEvent> {
        if !self.is_valid() {
            return Vec::new();
        }
        self.state = CalibrationState::Disabled;
        info!("Calibration disabled");
        vec![VnaEvent::CalibrationDisabled]
    }

    /// Drop every measured standard and the active terms.
    pub fn reset(&mut self) -> Vec<VnaEvent> {
        let events = self.disable();
        self.state = CalibrationState::Disabled;
        self.acquisition = None;
        self.measurements.clear();
        self.completed.clear();
        events
    }

    /// Named error-term series of the active calibration.
    pub fn error_term_traces(&self) -> Vec<(String, Vec<Sample>)> {
        match &self.state {
            CalibrationState::Valid(terms) => terms.error_term_traces(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn sweep_point(idx: u32, s11: f64) -> VnaDatapoint {
        let mut dp = VnaDatapoint::zero(idx, 1.0e6 * f64::from(idx + 1));
        dp.s11 = Complex64::new(s11, 0.0);
        dp
    }

    fn measure(cal: &mut Calibration, kind: CalibrationMeasurement, s11: f64) {
        cal.begin_measurement(kind, 3, false);
        for i in 0..3 {
            cal.add_measurement(&sweep_point(i, s11));
        }
    }

    #[test]
    fn wait_first_skips_until_point_zero() {
        let mut cal = Calibration::default();
        cal.begin_measurement(CalibrationMeasurement::Port1Open, 3, true);
        assert!(cal.add_measurement(&sweep_point(1, 1.0)).is_empty());
        assert!(cal.add_measurement(&sweep_point(2, 1.0)).is_empty());
        assert!(cal.measurement(CalibrationMeasurement::Port1Open).is_empty());
        cal.add_measurement(&sweep_point(0, 1.0));
        cal.add_measurement(&sweep_point(1, 1.0));
        let events = cal.add_measurement(&sweep_point(2, 1.0));
        assert_eq!(
            events,
            vec![VnaEvent::CalibrationMeasurementComplete(
                CalibrationMeasurement::Port1Open
            )]
        );
        assert!(cal.is_measured(CalibrationMeasurement::Port1Open));
        assert_eq!(cal.measurement(CalibrationMeasurement::Port1Open).len(), 3);
        assert!(matches!(cal.state(), CalibrationState::Disabled));
    }

    #[test]
    fn out_of_sweep_index_is_ignored() {
        let mut cal = Calibration::default();
        cal.begin_measurement(CalibrationMeasurement::Port1Open, 3, false);
        assert!(cal.add_measurement(&VnaDatapoint::zero(u32::MAX, 1.0e6)).is_empty());
        assert!(cal.add_measurement(&sweep_point(3, 1.0)).is_empty());
        assert!(cal.measurement(CalibrationMeasurement::Port1Open).is_empty());
        assert_eq!(cal.measuring(), Some(CalibrationMeasurement::Port1Open));

        for i in 0..3 {
            cal.add_measurement(&sweep_point(i, 1.0));
        }
        assert!(cal.is_measured(CalibrationMeasurement::Port1Open));
    }

    #[test]
    fn missing_standard_refuses() {
        let mut cal = Calibration::default();
        measure(&mut cal, CalibrationMeasurement::Port1Open, 1.0);
        measure(&mut cal, CalibrationMeasurement::Port1Short, -1.0);
        let err = cal.construct(CalibrationType::Port1Sol).unwrap_err();
        match err {
            VnaError::MissingCalibrationStandards { missing, .. } => {
                assert_eq!(missing, vec![CalibrationMeasurement::Port1Load]);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(!cal.is_valid());

        measure(&mut cal, CalibrationMeasurement::Port1Load, 0.0);
        let events = cal.construct(CalibrationType::Port1Sol).unwrap();
        assert_eq!(events, vec![VnaEvent::CalibrationApplied(CalibrationType::Port1Sol)]);
        assert_eq!(cal.active_type(), Some(CalibrationType::Port1Sol));
    }

    #[test]
    fn cancel_keeps_completed_standards() {
        let mut cal = Calibration::default();
        measure(&mut cal, CalibrationMeasurement::Port1Open, 1.0);
        cal.begin_measurement(CalibrationMeasurement::Port1Short, 3, false);
        cal.add_measurement(&sweep_point(0, -1.0));
        assert_eq!(cal.cancel_measurement(), Some(CalibrationMeasurement::Port1Short));
        assert!(cal.measurement(CalibrationMeasurement::Port1Short).is_empty());
        assert!(cal.is_measured(CalibrationMeasurement::Port1Open));
        assert_eq!(cal.cancel_measurement(), None);
    }

    #[test]
    fn construct_while_measuring_is_busy() {
        let mut cal = Calibration::default();
        cal.begin_measurement(CalibrationMeasurement::Through, 3, false);
        assert!(matches!(
            cal.construct(CalibrationType::TransmissionNormalization),
            Err(VnaError::CalibrationBusy(CalibrationMeasurement::Through))
        ));
    }

    #[derive(Debug)]
    struct FailingSolver;

    impl ErrorTermSolver for FailingSolver {
        fn solve(&self, _: CalibrationType, _: &MeasurementSet) -> Result<Box<dyn ErrorTerms>, String> {
            Err("singular standards".to_string())
        }
    }

    #[test]
    fn solver_failure_disables() {
        let mut cal = Calibration::new(Box::new(FailingSolver));
        measure(&mut cal, CalibrationMeasurement::Through, 0.0);
        let err = cal.construct(CalibrationType::TransmissionNormalization).unwrap_err();
        assert_eq!(err.to_string(), "Calibration failure: singular standards");
        assert!(matches!(cal.state(), CalibrationState::Disabled));
        assert!(cal.disable().is_empty());
    }

    #[test]
    fn correction_identity_unless_valid() {
        let cal = Calibration::default();
        let dp = sweep_point(0, 0.3);
        assert_eq!(cal.correct(&dp), dp);
    }
}
