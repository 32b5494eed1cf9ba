//! Error-term solver for ideal calibration standards.
//!
//! Standards are assumed ideal: open Γ = 1, short Γ = −1, load Γ = 0 and a
//! zero-length through. Terms follow the usual 12-term naming: forward
//! `e00` directivity, `e11` source match, `e10e01` reflection tracking,
//! `e10e32` transmission tracking, `e22` load match, `e30` isolation, and the
//! reverse counterparts `e33`, `e22r`, `e23e32`, `e23e01`, `e11r`, `e03`.

use super::{CalibrationMeasurement, CalibrationType, ErrorTermSolver, ErrorTerms, MeasurementSet};
use crate::measurement_types::{Sample, VnaDatapoint};
use num_complex::Complex64;

const SINGULAR_EPSILON: f64 = 1e-12;

fn zero() -> Complex64 {
    Complex64::new(0.0, 0.0)
}

fn one() -> Complex64 {
    Complex64::new(1.0, 0.0)
}

/// Three one-port terms of one port at one frequency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OnePortTerms {
    /// Directivity
    pub directivity: Complex64,
    /// Source match
    pub source_match: Complex64,
    /// Reflection tracking
    pub tracking: Complex64,
}

impl Default for OnePortTerms {
    fn default() -> Self {
        Self {
            directivity: zero(),
            source_match: zero(),
            tracking: one(),
        }
    }
}

impl OnePortTerms {
    /// Solve from measured open, short and load.
    fn solve(open: Complex64, short: Complex64, load: Complex64) -> Result<Self, String> {
        let directivity = load;
        let denom = open - short;
        if denom.norm() < SINGULAR_EPSILON {
            return Err("open and short standards are indistinguishable".to_string());
        }
        let source_match = (open + short - directivity * 2.0) / denom;
        let tracking = (open - directivity) * (one() - source_match);
        if tracking.norm() < SINGULAR_EPSILON {
            return Err("reflection tracking is zero".to_string());
        }
        Ok(Self {
            directivity,
            source_match,
            tracking,
        })
    }

    /// Corrected reflection coefficient from a measured one.
    pub fn correct(&self, measured: Complex64) -> Complex64 {
        let delta = measured - self.directivity;
        delta / (self.tracking + self.source_match * delta)
    }
}

/// All terms at one sweep point. Unused terms keep their neutral value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TermPoint {
    /// Frequency in Hz
    pub frequency: f64,
    /// Port 1 reflection terms
    pub port1: OnePortTerms,
    /// Port 2 reflection terms
    pub port2: OnePortTerms,
    /// Forward load match (e22)
    pub forward_load_match: Complex64,
    /// Forward transmission tracking (e10e32)
    pub forward_tracking: Complex64,
    /// Forward isolation (e30)
    pub forward_isolation: Complex64,
    /// Reverse load match (e11')
    pub reverse_load_match: Complex64,
    /// Reverse transmission tracking (e23e01)
    pub reverse_tracking: Complex64,
    /// Reverse isolation (e03)
    pub reverse_isolation: Complex64,
}

impl TermPoint {
    fn neutral(frequency: f64) -> Self {
        Self {
            frequency,
            port1: OnePortTerms::default(),
            port2: OnePortTerms::default(),
            forward_load_match: zero(),
            forward_tracking: one(),
            forward_isolation: zero(),
            reverse_load_match: zero(),
            reverse_tracking: one(),
            reverse_isolation: zero(),
        }
    }

    /// Full 12-term correction of all four parameters.
    fn correct_two_port(&self, dp: &VnaDatapoint) -> VnaDatapoint {
        let (e00, e11, e10e01) = (
            self.port1.directivity,
            self.port1.source_match,
            self.port1.tracking,
        );
        let (e33, e22r, e23e32) = (
            self.port2.directivity,
            self.port2.source_match,
            self.port2.tracking,
        );
        let (e22, e10e32, e30) = (
            self.forward_load_match,
            self.forward_tracking,
            self.forward_isolation,
        );
        let (e11r, e23e01, e03) = (
            self.reverse_load_match,
            self.reverse_tracking,
            self.reverse_isolation,
        );

        let a = (dp.s11 - e00) / e10e01;
        let b = (dp.s21 - e30) / e10e32;
        let c = (dp.s12 - e03) / e23e01;
        let d = (dp.s22 - e33) / e23e32;
        let denom = (one() + a * e11) * (one() + d * e22r) - b * c * e22 * e11r;

        VnaDatapoint {
            s11: (a * (one() + d * e22r) - e22 * b * c) / denom,
            s21: b * (one() + d * (e22r - e22)) / denom,
            s22: (d * (one() + a * e11) - e11r * b * c) / denom,
            s12: c * (one() + a * (e11 - e11r)) / denom,
            ..*dp
        }
    }
}

/// Error terms produced by [`IdealSolver`].
#[derive(Clone, Debug, PartialEq)]
pub struct IdealErrorTerms {
    calibration: CalibrationType,
    points: Vec<TermPoint>,
}

impl IdealErrorTerms {
    /// Per-point terms in sweep order.
    pub fn points(&self) -> &[TermPoint] {
        &self.points
    }

    fn series(&self, f: impl Fn(&TermPoint) -> Complex64) -> Vec<Sample> {
        self.points
            .iter()
            .map(|p| Sample::new(p.frequency, f(p)))
            .collect()
    }
}

impl ErrorTerms for IdealErrorTerms {
    fn calibration_type(&self) -> CalibrationType {
        self.calibration
    }

    fn correct(&self, dp: &VnaDatapoint) -> VnaDatapoint {
        let Some(terms) = self.points.get(dp.point_index as usize) else {
            return *dp;
        };
        match self.calibration {
            CalibrationType::Port1Sol => VnaDatapoint {
                s11: terms.port1.correct(dp.s11),
                ..*dp
            },
            CalibrationType::Port2Sol => VnaDatapoint {
                s22: terms.port2.correct(dp.s22),
                ..*dp
            },
            CalibrationType::TransmissionNormalization => VnaDatapoint {
                s21: dp.s21 / terms.forward_tracking,
                s12: dp.s12 / terms.reverse_tracking,
                ..*dp
            },
            CalibrationType::FullSolt => terms.correct_two_port(dp),
        }
    }

    fn error_term_traces(&self) -> Vec<(String, Vec<Sample>)> {
        let port1 = [
            ("Port 1 Directivity", self.series(|p| p.port1.directivity)),
            ("Port 1 Source Match", self.series(|p| p.port1.source_match)),
            ("Port 1 Reflection Tracking", self.series(|p| p.port1.tracking)),
        ];
        let port2 = [
            ("Port 2 Directivity", self.series(|p| p.port2.directivity)),
            ("Port 2 Source Match", self.series(|p| p.port2.source_match)),
            ("Port 2 Reflection Tracking", self.series(|p| p.port2.tracking)),
        ];
        let transmission = [
            ("Forward Transmission Tracking", self.series(|p| p.forward_tracking)),
            ("Reverse Transmission Tracking", self.series(|p| p.reverse_tracking)),
        ];
        let two_port = [
            ("Port 2 Load Match", self.series(|p| p.forward_load_match)),
            ("Port 1 Load Match", self.series(|p| p.reverse_load_match)),
            ("Forward Isolation", self.series(|p| p.forward_isolation)),
            ("Reverse Isolation", self.series(|p| p.reverse_isolation)),
        ];

        let named: Vec<(&str, Vec<Sample>)> = match self.calibration {
            CalibrationType::Port1Sol => port1.into_iter().collect(),
            CalibrationType::Port2Sol => port2.into_iter().collect(),
            CalibrationType::TransmissionNormalization => transmission.into_iter().collect(),
            CalibrationType::FullSolt => port1
                .into_iter()
                .chain(port2)
                .chain(transmission)
                .chain(two_port)
                .collect(),
        };
        named
            .into_iter()
            .map(|(name, samples)| (name.to_string(), samples))
            .collect()
    }
}

/// Solver assuming ideal standards.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdealSolver;

fn standard<'a>(
    measurements: &'a MeasurementSet,
    kind: CalibrationMeasurement,
    points: usize,
) -> Result<&'a [VnaDatapoint], String> {
    let data = measurements
        .get(&kind)
        .ok_or_else(|| format!("{} not measured", kind))?;
    if data.len() != points {
        return Err(format!(
            "{} has {} points, expected {}",
            kind,
            data.len(),
            points
        ));
    }
    Ok(data)
}

fn one_port(
    measurements: &MeasurementSet,
    points: usize,
    port: u8,
) -> Result<Vec<OnePortTerms>, String> {
    use CalibrationMeasurement::*;
    let (open, short, load) = if port == 1 {
        (Port1Open, Port1Short, Port1Load)
    } else {
        (Port2Open, Port2Short, Port2Load)
    };
    let reflection = |dp: &VnaDatapoint| if port == 1 { dp.s11 } else { dp.s22 };
    let open = standard(measurements, open, points)?;
    let short = standard(measurements, short, points)?;
    let load = standard(measurements, load, points)?;
    open.iter()
        .zip(short)
        .zip(load)
        .map(|((o, s), l)| {
            OnePortTerms::solve(reflection(o), reflection(s), reflection(l))
                .map_err(|e| format!("Port {} at {:.0} Hz: {}", port, o.frequency, e))
        })
        .collect()
}

impl ErrorTermSolver for IdealSolver {
    fn solve(
        &self,
        calibration: CalibrationType,
        measurements: &MeasurementSet,
    ) -> Result<Box<dyn ErrorTerms>, String> {
        let reference = calibration
            .required_measurements()
            .first()
            .and_then(|m| measurements.get(m))
            .ok_or_else(|| "no standards measured".to_string())?;
        let n = reference.len();
        if n == 0 {
            return Err("standards contain no points".to_string());
        }
        let mut points: Vec<TermPoint> = reference
            .iter()
            .map(|dp| TermPoint::neutral(dp.frequency))
            .collect();

        match calibration {
            CalibrationType::Port1Sol => {
                for (p, t) in points.iter_mut().zip(one_port(measurements, n, 1)?) {
                    p.port1 = t;
                }
            }
            CalibrationType::Port2Sol => {
                for (p, t) in points.iter_mut().zip(one_port(measurements, n, 2)?) {
                    p.port2 = t;
                }
            }
            CalibrationType::TransmissionNormalization => {
                let through = standard(measurements, CalibrationMeasurement::Through, n)?;
                for (p, t) in points.iter_mut().zip(through) {
                    if t.s21.norm() < SINGULAR_EPSILON || t.s12.norm() < SINGULAR_EPSILON {
                        return Err(format!("through has no transmission at {:.0} Hz", t.frequency));
                    }
                    p.forward_tracking = t.s21;
                    p.reverse_tracking = t.s12;
                }
            }
            CalibrationType::FullSolt => {
                let port1 = one_port(measurements, n, 1)?;
                let port2 = one_port(measurements, n, 2)?;
                let through = standard(measurements, CalibrationMeasurement::Through, n)?;
                let isolation = standard(measurements, CalibrationMeasurement::Isolation, n)?;
                for (i, p) in points.iter_mut().enumerate() {
                    let (p1, p2, t, iso) = (port1[i], port2[i], through[i], isolation[i]);
                    p.port1 = p1;
                    p.port2 = p2;
                    p.forward_isolation = iso.s21;
                    p.reverse_isolation = iso.s12;

                    let d11 = t.s11 - p1.directivity;
                    p.forward_load_match = d11 / (p1.tracking + p1.source_match * d11);
                    p.forward_tracking = (t.s21 - p.forward_isolation)
                        * (one() - p1.source_match * p.forward_load_match);

                    let d22 = t.s22 - p2.directivity;
                    p.reverse_load_match = d22 / (p2.tracking + p2.source_match * d22);
                    p.reverse_tracking = (t.s12 - p.reverse_isolation)
                        * (one() - p2.source_match * p.reverse_load_match);

                    if p.forward_tracking.norm() < SINGULAR_EPSILON
                        || p.reverse_tracking.norm() < SINGULAR_EPSILON
                    {
                        return Err(format!("through has no transmission at {:.0} Hz", t.frequency));
                    }
                }
            }
        }

        Ok(Box::new(IdealErrorTerms {
            calibration,
            points,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{Dut, MockErrorModel};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn model() -> MockErrorModel {
        MockErrorModel::typical()
    }

    fn sweep(model: &MockErrorModel, dut: Dut, n: u32) -> Vec<VnaDatapoint> {
        (0..n)
            .map(|i| model.measure(i, 1.0e8 * f64::from(i + 1), dut))
            .collect()
    }

    fn all_standards(model: &MockErrorModel, n: u32) -> MeasurementSet {
        let mut set = MeasurementSet::new();
        set.insert(CalibrationMeasurement::Port1Open, sweep(model, Dut::Open, n));
        set.insert(CalibrationMeasurement::Port1Short, sweep(model, Dut::Short, n));
        set.insert(CalibrationMeasurement::Port1Load, sweep(model, Dut::Load, n));
        set.insert(CalibrationMeasurement::Port2Open, sweep(model, Dut::Open, n));
        set.insert(CalibrationMeasurement::Port2Short, sweep(model, Dut::Short, n));
        set.insert(CalibrationMeasurement::Port2Load, sweep(model, Dut::Load, n));
        set.insert(CalibrationMeasurement::Through, sweep(model, Dut::Through, n));
        set.insert(CalibrationMeasurement::Isolation, sweep(model, Dut::Isolation, n));
        set
    }

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn one_port_recovers_reflection() {
        let terms = OnePortTerms::solve(c(0.9, 0.1), c(-0.8, 0.05), c(0.05, -0.02)).unwrap();
        // Re-measure the open through the same terms
        assert!(close(terms.correct(c(0.9, 0.1)), c(1.0, 0.0)));
        assert!(close(terms.correct(c(-0.8, 0.05)), c(-1.0, 0.0)));
        assert!(close(terms.correct(c(0.05, -0.02)), c(0.0, 0.0)));
    }

    #[test]
    fn singular_standards_fail() {
        assert!(OnePortTerms::solve(c(0.5, 0.0), c(0.5, 0.0), c(0.0, 0.0)).is_err());
    }

    #[test]
    fn full_solt_recovers_dut() {
        let model = model();
        let set = all_standards(&model, 5);
        let terms = IdealSolver.solve(CalibrationType::FullSolt, &set).unwrap();
        let dut = Dut::SeriesResonator {
            resonance: 3.0e8,
            resistance: 0.4,
            reactance_slope: 2.0,
        };
        for i in 0..5 {
            let f = 1.0e8 * f64::from(i + 1);
            let measured = model.measure(i, f, dut);
            let actual = dut.s_parameters(f);
            let corrected = terms.correct(&measured);
            assert!(close(corrected.s11, actual[0]), "S11 at {}", f);
            assert!(close(corrected.s12, actual[1]), "S12 at {}", f);
            assert!(close(corrected.s21, actual[2]), "S21 at {}", f);
            assert!(close(corrected.s22, actual[3]), "S22 at {}", f);
        }
    }

    #[test]
    fn port_sol_corrects_only_its_port() {
        let model = model();
        let set = all_standards(&model, 3);
        let terms = IdealSolver.solve(CalibrationType::Port1Sol, &set).unwrap();
        let measured = model.measure(1, 2.0e8, Dut::Short);
        let corrected = terms.correct(&measured);
        assert!(close(corrected.s11, c(-1.0, 0.0)));
        assert_eq!(corrected.s22, measured.s22);
        assert_eq!(terms.error_term_traces().len(), 3);
    }

    #[test]
    fn normalization_divides_through() {
        let model = model();
        let set = all_standards(&model, 3);
        let terms = IdealSolver
            .solve(CalibrationType::TransmissionNormalization, &set)
            .unwrap();
        let measured = model.measure(2, 3.0e8, Dut::Through);
        let corrected = terms.correct(&measured);
        assert!(close(corrected.s21, c(1.0, 0.0)));
        assert!(close(corrected.s12, c(1.0, 0.0)));
    }

    #[test]
    fn point_count_mismatch_fails() {
        let model = model();
        let mut set = all_standards(&model, 4);
        set.insert(CalibrationMeasurement::Port1Load, sweep(&model, Dut::Load, 3));
        let err = IdealSolver.solve(CalibrationType::Port1Sol, &set).unwrap_err();
        assert!(err.contains("Port 1 Load"), "{}", err);
    }

    #[test]
    fn points_outside_calibration_pass_through() {
        let model = model();
        let set = all_standards(&model, 2);
        let terms = IdealSolver.solve(CalibrationType::FullSolt, &set).unwrap();
        let dp = model.measure(7, 8.0e8, Dut::Open);
        assert_eq!(terms.correct(&dp), dp);
    }
}
