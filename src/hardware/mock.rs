//! Mock VNA
//!
//! Simulated two-port analyzer for running the measurement core without an
//! instrument. The mock applies a fixed 12-term error model to the S-parameters
//! of a selectable device under test and optionally adds uniform noise.
//!
//! # Example
//!
//! ```
//! use rust_vna::hardware::mock::{Dut, MockVna};
//! use rust_vna::sweep::SweepSettings;
//!
//! let mut settings = SweepSettings::default();
//! settings.points = 11;
//! let mut vna = MockVna::new(settings);
//! vna.set_dut(Dut::Short);
//! let sweep = vna.sweep();
//! assert_eq!(sweep.len(), 11);
//! assert_eq!(sweep[10].point_index, 10);
//! ```

use crate::measurement_types::VnaDatapoint;
use crate::sweep::SweepSettings;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

/// Device connected to the mock's ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dut {
    /// Open on both ports
    Open,
    /// Short on both ports
    Short,
    /// Matched load on both ports
    Load,
    /// Ports connected directly
    Through,
    /// Both ports terminated, no coupling
    Isolation,
    /// Series RLC between the ports
    SeriesResonator {
        /// Resonance frequency in Hz
        resonance: f64,
        /// Series resistance normalised to 50 Ω
        resistance: f64,
        /// Normalised reactance slope (loaded Q times resistance)
        reactance_slope: f64,
    },
}

impl Dut {
    /// Actual S-parameters `[S11, S12, S21, S22]` at `frequency`.
    pub fn s_parameters(&self, frequency: f64) -> [Complex64; 4] {
        let zero = c(0.0, 0.0);
        match *self {
            Dut::Open => [c(1.0, 0.0), zero, zero, c(1.0, 0.0)],
            Dut::Short => [c(-1.0, 0.0), zero, zero, c(-1.0, 0.0)],
            Dut::Load | Dut::Isolation => [zero; 4],
            Dut::Through => [zero, c(1.0, 0.0), c(1.0, 0.0), zero],
            Dut::SeriesResonator {
                resonance,
                resistance,
                reactance_slope,
            } => {
                let detune = frequency / resonance - resonance / frequency;
                let z = c(resistance, reactance_slope * detune);
                let reflection = z / (z + 2.0);
                let transmission = c(2.0, 0.0) / (z + 2.0);
                [reflection, transmission, transmission, reflection]
            }
        }
    }
}

/// Systematic errors of the simulated front end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockErrorModel {
    /// Forward directivity (e00)
    pub directivity: Complex64,
    /// Forward source match (e11)
    pub source_match: Complex64,
    /// Forward reflection tracking (e10e01)
    pub reflection_tracking: Complex64,
    /// Forward load match (e22)
    pub load_match: Complex64,
    /// Forward transmission tracking (e10e32)
    pub transmission_tracking: Complex64,
    /// Forward isolation (e30)
    pub isolation: Complex64,
    /// Reverse directivity
    pub reverse_directivity: Complex64,
    /// Reverse source match
    pub reverse_source_match: Complex64,
    /// Reverse reflection tracking
    pub reverse_reflection_tracking: Complex64,
    /// Reverse load match
    pub reverse_load_match: Complex64,
    /// Reverse transmission tracking
    pub reverse_transmission_tracking: Complex64,
    /// Reverse isolation
    pub reverse_isolation: Complex64,
    /// Electrical delay of the test port cables in seconds
    pub cable_delay: f64,
}

impl MockErrorModel {
    /// Error-free front end.
    pub fn ideal() -> Self {
        let one = c(1.0, 0.0);
        let zero = c(0.0, 0.0);
        Self {
            directivity: zero,
            source_match: zero,
            reflection_tracking: one,
            load_match: zero,
            transmission_tracking: one,
            isolation: zero,
            reverse_directivity: zero,
            reverse_source_match: zero,
            reverse_reflection_tracking: one,
            reverse_load_match: zero,
            reverse_transmission_tracking: one,
            reverse_isolation: zero,
            cable_delay: 0.0,
        }
    }

    /// Plausible uncalibrated front end.
    pub fn typical() -> Self {
        Self {
            directivity: c(0.05, -0.02),
            source_match: c(0.08, 0.03),
            reflection_tracking: c(0.85, -0.1),
            load_match: c(-0.06, 0.04),
            transmission_tracking: c(0.8, 0.05),
            isolation: c(0.001, 0.0005),
            reverse_directivity: c(-0.04, 0.03),
            reverse_source_match: c(0.07, -0.05),
            reverse_reflection_tracking: c(0.9, 0.08),
            reverse_load_match: c(0.05, 0.02),
            reverse_transmission_tracking: c(0.78, -0.04),
            reverse_isolation: c(0.0008, -0.0004),
            cable_delay: 0.5e-9,
        }
    }

    /// Noise-free raw measurement of `dut` at one point.
    pub fn measure(&self, point_index: u32, frequency: f64, dut: Dut) -> VnaDatapoint {
        let [s11, s12, s21, s22] = dut.s_parameters(frequency);
        let delta = s11 * s22 - s21 * s12;
        // Cable delay rotates the tracking terms
        let delay = Complex64::from_polar(1.0, -2.0 * PI * frequency * self.cable_delay);
        let e10e01 = self.reflection_tracking * delay * delay;
        let e10e32 = self.transmission_tracking * delay * delay;
        let e23e32 = self.reverse_reflection_tracking * delay * delay;
        let e23e01 = self.reverse_transmission_tracking * delay * delay;

        let (e00, e11, e22, e30) = (
            self.directivity,
            self.source_match,
            self.load_match,
            self.isolation,
        );
        let (e33, e22r, e11r, e03) = (
            self.reverse_directivity,
            self.reverse_source_match,
            self.reverse_load_match,
            self.reverse_isolation,
        );

        let forward = c(1.0, 0.0) - e11 * s11 - e22 * s22 + e11 * e22 * delta;
        let reverse = c(1.0, 0.0) - e22r * s22 - e11r * s11 + e22r * e11r * delta;

        VnaDatapoint {
            point_index,
            frequency,
            s11: e00 + e10e01 * (s11 - e22 * delta) / forward,
            s21: e30 + e10e32 * s21 / forward,
            s22: e33 + e23e32 * (s22 - e11r * delta) / reverse,
            s12: e03 + e23e01 * s12 / reverse,
        }
    }
}

/// Simulated analyzer producing one sweep at a time.
#[derive(Debug)]
pub struct MockVna {
    settings: SweepSettings,
    model: MockErrorModel,
    dut: Dut,
    noise: f64,
    rng: StdRng,
}

impl MockVna {
    /// Mock with the typical error model, a series resonator at the sweep
    /// center and no noise.
    pub fn new(settings: SweepSettings) -> Self {
        Self::with_seed(settings, 0x5EED)
    }

    /// Mock with a fixed noise seed.
    pub fn with_seed(settings: SweepSettings, seed: u64) -> Self {
        Self {
            settings,
            model: MockErrorModel::typical(),
            dut: Dut::SeriesResonator {
                resonance: settings.center(),
                resistance: 0.2,
                reactance_slope: 5.0,
            },
            noise: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Apply a new sweep configuration.
    pub fn configure(&mut self, settings: SweepSettings) {
        self.settings = settings;
    }

    /// Sweep the instrument is configured for.
    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Connect a different device under test.
    pub fn set_dut(&mut self, dut: Dut) {
        self.dut = dut;
    }

    /// Connected device under test.
    pub fn dut(&self) -> Dut {
        self.dut
    }

    /// Replace the simulated front-end errors.
    pub fn set_error_model(&mut self, model: MockErrorModel) {
        self.model = model;
    }

    /// Simulated front-end errors.
    pub fn error_model(&self) -> &MockErrorModel {
        &self.model
    }

    /// Peak noise amplitude added to each raw value.
    pub fn set_noise(&mut self, amplitude: f64) {
        self.noise = amplitude.max(0.0);
    }

    /// Raw measurement of one sweep point.
    pub fn point(&mut self, point_index: u32) -> VnaDatapoint {
        let frequency = self.settings.frequency_at(point_index);
        let mut dp = self.model.measure(point_index, frequency, self.dut);
        if self.noise > 0.0 {
            for value in [&mut dp.s11, &mut dp.s12, &mut dp.s21, &mut dp.s22] {
                *value += self.noise_sample();
            }
        }
        if !self.settings.excite_port1 {
            dp.s11 = c(0.0, 0.0);
            dp.s21 = c(0.0, 0.0);
        }
        if !self.settings.excite_port2 {
            dp.s22 = c(0.0, 0.0);
            dp.s12 = c(0.0, 0.0);
        }
        dp
    }

    /// All points of one sweep, in point order.
    pub fn sweep(&mut self) -> Vec<VnaDatapoint> {
        (0..self.settings.points).map(|i| self.point(i)).collect()
    }

    fn noise_sample(&mut self) -> Complex64 {
        let re: f64 = self.rng.gen_range(-self.noise..=self.noise);
        let im: f64 = self.rng.gen_range(-self.noise..=self.noise);
        c(re, im)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(points: u32) -> SweepSettings {
        SweepSettings {
            f_start: 1.0e8,
            f_stop: 1.0e9,
            points,
            ..SweepSettings::default()
        }
    }

    #[test]
    fn ideal_model_is_transparent() {
        let model = MockErrorModel::ideal();
        let dut = Dut::SeriesResonator {
            resonance: 5.0e8,
            resistance: 0.1,
            reactance_slope: 3.0,
        };
        let dp = model.measure(0, 4.0e8, dut);
        let actual = dut.s_parameters(4.0e8);
        assert!((dp.s11 - actual[0]).norm() < 1e-12);
        assert!((dp.s21 - actual[2]).norm() < 1e-12);
    }

    #[test]
    fn resonator_passes_at_resonance() {
        let dut = Dut::SeriesResonator {
            resonance: 5.0e8,
            resistance: 0.0,
            reactance_slope: 3.0,
        };
        let s = dut.s_parameters(5.0e8);
        assert!(s[0].norm() < 1e-12);
        assert!((s[2] - c(1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn sweep_follows_settings() {
        let mut vna = MockVna::new(settings(21));
        let sweep = vna.sweep();
        assert_eq!(sweep.len(), 21);
        assert_eq!(sweep[0].frequency, 1.0e8);
        assert_eq!(sweep[20].frequency, 1.0e9);
        assert!(sweep.iter().enumerate().all(|(i, dp)| dp.point_index == i as u32));
    }

    #[test]
    fn noise_is_bounded_and_seeded() {
        let mut a = MockVna::with_seed(settings(5), 7);
        let mut b = MockVna::with_seed(settings(5), 7);
        a.set_noise(0.01);
        b.set_noise(0.01);
        a.set_dut(Dut::Load);
        b.set_dut(Dut::Load);
        let sa = a.sweep();
        assert_eq!(sa, b.sweep());
        let directivity = a.error_model().directivity;
        assert!(sa.iter().all(|dp| (dp.s11 - directivity).norm() <= 0.01 * 2f64.sqrt() + 1e-12));
    }

    #[test]
    fn unexcited_port_reads_zero() {
        let mut s = settings(3);
        s.excite_port2 = false;
        let mut vna = MockVna::new(s);
        let dp = vna.point(1);
        assert_eq!(dp.s22, c(0.0, 0.0));
        assert_ne!(dp.s11, c(0.0, 0.0));
    }
}
