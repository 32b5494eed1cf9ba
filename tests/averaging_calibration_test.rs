//! Averaging and calibration workflow tests.
//!
//! Standards are measured against the simulated analyzer's error model; a
//! correctly solved calibration must reproduce the true device parameters.

use num_complex::Complex64;
use parking_lot::Mutex;
use rust_vna::calibration::{
    CalibrationMeasurement, CalibrationType, ErrorTermSolver, ErrorTerms, IdealSolver,
    MeasurementSet,
};
use rust_vna::config::Settings;
use rust_vna::data::averaging::SweepAverager;
use rust_vna::data::tdr::FftTdr;
use rust_vna::error::VnaError;
use rust_vna::events::{EventBus, VnaEvent};
use rust_vna::hardware::{Dut, MockVna};
use rust_vna::measurement_types::LiveParameter;
use rust_vna::vna::Vna;
use std::sync::Arc;

// =============================================================================
// Test Helper Functions
// =============================================================================

fn settings(points: u32, averages: u32) -> Settings {
    let mut settings = Settings::default();
    settings.sweep.f_start = 1.0e7;
    settings.sweep.f_stop = 1.0e9;
    settings.sweep.points = points;
    settings.sweep.averages = averages;
    settings
}

fn record(vna: &Vna) -> Arc<Mutex<Vec<VnaEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    vna.bus().subscribe(move |e| sink.lock().push(e.clone()));
    log
}

fn sweep_once(vna: &mut Vna, mock: &mut MockVna) {
    mock.configure(*vna.settings());
    for dp in mock.sweep() {
        vna.deliver(dp);
    }
}

fn dut_for(kind: CalibrationMeasurement) -> Dut {
    use CalibrationMeasurement::*;
    match kind {
        Port1Open | Port2Open => Dut::Open,
        Port1Short | Port2Short => Dut::Short,
        Port1Load | Port2Load => Dut::Load,
        Through => Dut::Through,
        Isolation => Dut::Isolation,
    }
}

fn measure_standards(vna: &mut Vna, mock: &mut MockVna, calibration: CalibrationType) {
    for &kind in calibration.required_measurements() {
        mock.set_dut(dut_for(kind));
        vna.start_calibration_measurement(kind);
        for _ in 0..vna.settings().averages {
            sweep_once(vna, mock);
        }
        assert!(vna.calibration().is_measured(kind), "{kind} not measured");
    }
}

fn resonator(center: f64) -> Dut {
    Dut::SeriesResonator {
        resonance: center,
        resistance: 0.3,
        reactance_slope: 4.0,
    }
}

fn max_residual(vna: &Vna, dut: Dut, parameter: LiveParameter) -> f64 {
    let trace = vna
        .traces()
        .traces()
        .find(|t| t.parameter() == parameter)
        .unwrap();
    assert!(!trace.is_empty());
    trace
        .samples()
        .iter()
        .map(|s| (s.value - dut.s_parameters(s.frequency)[parameter as usize]).norm())
        .fold(0.0, f64::max)
}

// =============================================================================
// Calibration accuracy
// =============================================================================

#[test]
fn test_full_solt_recovers_true_parameters() {
    let mut vna = Vna::new(&settings(41, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::FullSolt);

    let log = record(&vna);
    vna.apply_calibration(CalibrationType::FullSolt).unwrap();
    assert!(vna.calibration().is_valid());
    assert!(log
        .lock()
        .contains(&VnaEvent::CalibrationApplied(CalibrationType::FullSolt)));

    let dut = resonator(vna.settings().center());
    mock.set_dut(dut);
    sweep_once(&mut vna, &mut mock);

    for parameter in LiveParameter::ALL {
        let residual = max_residual(&vna, dut, parameter);
        assert!(residual < 1e-9, "{parameter} residual {residual}");
    }
}

#[test]
fn test_uncalibrated_data_shows_error_model() {
    let mut vna = Vna::new(&settings(21, 1));
    let mut mock = MockVna::new(*vna.settings());
    let dut = resonator(vna.settings().center());
    mock.set_dut(dut);
    sweep_once(&mut vna, &mut mock);
    assert!(max_residual(&vna, dut, LiveParameter::S11) > 1e-2);
}

#[test]
fn test_port1_sol_corrects_only_s11() {
    let mut vna = Vna::new(&settings(21, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::Port1Sol);
    vna.apply_calibration(CalibrationType::Port1Sol).unwrap();

    mock.set_dut(Dut::Short);
    sweep_once(&mut vna, &mut mock);
    assert!(max_residual(&vna, Dut::Short, LiveParameter::S11) < 1e-9);
    assert!(max_residual(&vna, Dut::Short, LiveParameter::S22) > 1e-2);
}

#[test]
fn test_transmission_normalization_of_through() {
    let mut vna = Vna::new(&settings(21, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::TransmissionNormalization);
    vna.apply_calibration(CalibrationType::TransmissionNormalization)
        .unwrap();

    mock.set_dut(Dut::Through);
    sweep_once(&mut vna, &mut mock);
    assert!(max_residual(&vna, Dut::Through, LiveParameter::S21) < 1e-12);
    assert!(max_residual(&vna, Dut::Through, LiveParameter::S12) < 1e-12);
}

// =============================================================================
// Acquisition
// =============================================================================

#[test]
fn test_standard_acquired_from_final_averaging_sweep() {
    let averages = 4;
    let mut vna = Vna::new(&settings(11, averages));
    let mut mock = MockVna::with_seed(*vna.settings(), 42);
    mock.set_noise(0.01);
    mock.set_dut(Dut::Load);

    vna.start_calibration_measurement(CalibrationMeasurement::Port1Load);
    for sweep in 1..averages {
        sweep_once(&mut vna, &mut mock);
        assert!(!vna.calibration().is_measured(CalibrationMeasurement::Port1Load));
        assert_eq!(vna.calibration_progress(), Some(sweep * 100 / averages));
    }
    sweep_once(&mut vna, &mut mock);
    assert!(vna.calibration().is_measured(CalibrationMeasurement::Port1Load));
    assert_eq!(vna.calibration().measuring(), None);
    assert_eq!(vna.calibration_progress(), None);

    // Same seed, same sweeps: the stored standard is the per-point mean
    let mut replay = MockVna::with_seed(*vna.settings(), 42);
    replay.set_noise(0.01);
    replay.set_dut(Dut::Load);
    let mut averager = SweepAverager::<[Complex64; 4]>::new(11, averages);
    let mut expected = Vec::new();
    for _ in 0..averages {
        expected = replay
            .sweep()
            .into_iter()
            .map(|dp| averager.process_datapoint(dp))
            .collect();
    }
    let stored = vna.calibration().measurement(CalibrationMeasurement::Port1Load);
    assert_eq!(stored.len(), 11);
    for (s, e) in stored.iter().zip(&expected) {
        assert_eq!(s.point_index, e.point_index);
        assert!((s.s11 - e.s11).norm() < 1e-15);
    }
}

#[test]
fn test_wait_first_skips_partial_sweep() {
    let mut vna = Vna::new(&settings(6, 1));
    let mut mock = MockVna::new(*vna.settings());
    mock.set_dut(Dut::Open);
    let sweep = mock.sweep();

    vna.start_calibration_measurement(CalibrationMeasurement::Port1Open);
    // Joining mid-sweep: points 3..6 are ignored
    for dp in &sweep[3..] {
        vna.deliver(*dp);
    }
    assert!(vna.calibration().measurement(CalibrationMeasurement::Port1Open).is_empty());

    for dp in &sweep {
        vna.deliver(*dp);
    }
    assert!(vna.calibration().is_measured(CalibrationMeasurement::Port1Open));
    assert_eq!(
        vna.calibration()
            .measurement(CalibrationMeasurement::Port1Open)
            .len(),
        6
    );
}

#[test]
fn test_measurement_complete_event() {
    let mut vna = Vna::new(&settings(5, 1));
    let mut mock = MockVna::new(*vna.settings());
    let log = record(&vna);
    mock.set_dut(Dut::Through);
    vna.start_calibration_measurement(CalibrationMeasurement::Through);
    sweep_once(&mut vna, &mut mock);
    let completions = log
        .lock()
        .iter()
        .filter(|e| matches!(e, VnaEvent::CalibrationMeasurementComplete(_)))
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn test_cancel_discards_only_partial_data() {
    let mut vna = Vna::new(&settings(8, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::TransmissionNormalization);

    mock.set_dut(Dut::Open);
    vna.start_calibration_measurement(CalibrationMeasurement::Port1Open);
    let sweep = mock.sweep();
    for dp in &sweep[..4] {
        vna.deliver(*dp);
    }
    assert_eq!(
        vna.cancel_calibration_measurement(),
        Some(CalibrationMeasurement::Port1Open)
    );
    assert_eq!(vna.calibration().measuring(), None);
    assert!(!vna.calibration().is_measured(CalibrationMeasurement::Port1Open));
    assert!(vna.calibration().is_measured(CalibrationMeasurement::Through));
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn test_missing_standards_disable_calibration() {
    let mut vna = Vna::new(&settings(5, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::Port1Sol);
    let log = record(&vna);

    let err = vna.apply_calibration(CalibrationType::FullSolt).unwrap_err();
    match err {
        VnaError::MissingCalibrationStandards {
            calibration,
            missing,
        } => {
            assert_eq!(calibration, CalibrationType::FullSolt);
            assert_eq!(missing.len(), 5);
            assert!(!missing.contains(&CalibrationMeasurement::Port1Open));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!vna.calibration().is_valid());
    assert!(log.lock().contains(&VnaEvent::CalibrationDisabled));
}

#[test]
fn test_apply_while_measuring_is_busy() {
    let mut vna = Vna::new(&settings(5, 1));
    vna.start_calibration_measurement(CalibrationMeasurement::Through);
    assert!(matches!(
        vna.apply_calibration(CalibrationType::TransmissionNormalization),
        Err(VnaError::CalibrationBusy(CalibrationMeasurement::Through))
    ));
}

struct RejectingSolver;

impl ErrorTermSolver for RejectingSolver {
    fn solve(
        &self,
        _calibration: CalibrationType,
        _measurements: &MeasurementSet,
    ) -> Result<Box<dyn ErrorTerms>, String> {
        Err("standards are degenerate".to_string())
    }
}

#[test]
fn test_solver_failure_reports_reason() {
    let bus = Arc::new(EventBus::default());
    let mut vna = Vna::with_components(
        &settings(5, 1),
        bus,
        Box::new(RejectingSolver),
        Box::new(FftTdr),
    );
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::TransmissionNormalization);
    assert!(vna.averager().completed_sweeps() > 0);
    let log = record(&vna);

    let err = vna
        .apply_calibration(CalibrationType::TransmissionNormalization)
        .unwrap_err();
    assert!(matches!(err, VnaError::CalibrationSolverFailure(_)));
    assert!(!vna.calibration().is_valid());
    // Averaging restarts as for an explicit disable
    assert_eq!(vna.averager().completed_sweeps(), 0);
    let events = log.lock().clone();
    assert_eq!(
        events,
        vec![
            VnaEvent::CalibrationFailed {
                reason: "standards are degenerate".to_string()
            },
            VnaEvent::CalibrationDisabled,
        ]
    );
}

// =============================================================================
// Settings interaction
// =============================================================================

#[test]
fn test_span_change_invalidates_calibration() {
    let mut vna = Vna::new(&settings(11, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::Port1Sol);
    vna.apply_calibration(CalibrationType::Port1Sol).unwrap();

    vna.set_source_level(-30.0);
    vna.set_averages(3);
    assert!(vna.calibration().is_valid());

    vna.set_span(5.0e8);
    assert!(!vna.calibration().is_valid());
    assert!(!vna.calibration().is_measured(CalibrationMeasurement::Port1Open));
}

#[test]
fn test_disable_keeps_standards() {
    let mut vna = Vna::new(&settings(11, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::Port1Sol);
    vna.apply_calibration(CalibrationType::Port1Sol).unwrap();
    let log = record(&vna);

    vna.disable_calibration();
    assert!(!vna.calibration().is_valid());
    assert_eq!(log.lock().clone(), vec![VnaEvent::CalibrationDisabled]);
    assert!(vna.calibration().calculation_possible(CalibrationType::Port1Sol));

    // Nothing to disable the second time
    vna.disable_calibration();
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_error_terms_import_as_read_only_traces() {
    let mut vna = Vna::new(&settings(11, 1));
    let mut mock = MockVna::new(*vna.settings());
    measure_standards(&mut vna, &mut mock, CalibrationType::Port1Sol);
    vna.apply_calibration(CalibrationType::Port1Sol).unwrap();

    let ids = vna.import_error_terms_as_traces();
    assert_eq!(ids.len(), 3);
    let directivity = vna.trace(ids[0]).unwrap();
    assert_eq!(directivity.name(), "Port 1 Directivity");
    assert!(directivity.is_calibration());
    assert_eq!(directivity.len(), 11);
    let expected = mock.error_model().directivity;
    assert!(directivity
        .samples()
        .iter()
        .all(|s| (s.value - expected).norm() < 1e-9));

    // Not live: sweeps leave it alone
    sweep_once(&mut vna, &mut mock);
    assert_eq!(vna.trace(ids[0]).unwrap().len(), 11);
}

#[test]
fn test_default_solver_is_ideal() {
    let solver: Box<dyn ErrorTermSolver> = Box::new(IdealSolver);
    assert!(solver
        .solve(CalibrationType::Port1Sol, &MeasurementSet::new())
        .is_err());
}
