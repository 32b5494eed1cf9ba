//! Time-domain (TDR) transform of a frequency-domain trace.
//!
//! The transform runs in low-pass mode: the DC value is extrapolated from the
//! first two points, a half Hann taper suppresses ringing from the band edge,
//! and the resulting Hermitian spectrum is inverse-transformed with `rustfft`.
//! The step response is the running sum of the impulse response, starting in
//! the negative-time half so that it settles at the reflection coefficient.

use crate::measurement_types::Sample;
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One point of a time-domain series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TdrPoint {
    /// Time in seconds
    pub time: f64,
    /// Real part of the impulse response
    pub impulse_response: f64,
    /// Step response (running sum of the impulse response)
    pub step_response: f64,
}

/// Computes the time-domain series of a trace on demand.
///
/// Implementations must tolerate short input and return an empty series
/// instead of failing.
pub trait TdrProvider: Send + Sync {
    /// Transform a frequency-ascending, evenly spaced series.
    fn compute(&self, samples: &[Sample]) -> Vec<TdrPoint>;
}

/// Default FFT-based provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct FftTdr;

impl TdrProvider for FftTdr {
    fn compute(&self, samples: &[Sample]) -> Vec<TdrPoint> {
        let n = samples.len();
        if n < 2 {
            return Vec::new();
        }
        let step = samples[1].frequency - samples[0].frequency;
        if !(step.is_finite() && step > 0.0) {
            return Vec::new();
        }

        // Bin 0 is DC, bins 1..=n carry the measurement
        let fft_len = (2 * (n + 1)).next_power_of_two();
        let mut buffer = vec![Complex64::new(0.0, 0.0); fft_len];

        let dc = 2.0 * samples[0].value.re - samples[1].value.re;
        buffer[0] = Complex64::new(dc, 0.0);

        for (i, sample) in samples.iter().enumerate() {
            let w = 0.5 * (1.0 + (PI * i as f64 / n as f64).cos());
            let value = sample.value * w;
            buffer[i + 1] = value;
            buffer[fft_len - i - 1] = value.conj();
        }

        let mut planner = FftPlanner::<f64>::new();
        let ifft = planner.plan_fft_inverse(fft_len);
        ifft.process(&mut buffer);

        // Scale so a flat spectrum settles at its reflection coefficient
        let scale = 1.0 / fft_len as f64;
        let half = fft_len / 2;
        let dt = 1.0 / (fft_len as f64 * step);
        // The upper half of the buffer is negative time
        let mut step_response: f64 = buffer[half..].iter().map(|v| v.re * scale).sum();
        buffer
            .iter()
            .take(half)
            .enumerate()
            .map(|(i, v)| {
                let impulse = v.re * scale;
                step_response += impulse;
                TdrPoint {
                    time: i as f64 * dt,
                    impulse_response: impulse,
                    step_response,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(n: usize, value: Complex64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(1.0e6 * (i + 1) as f64, value))
            .collect()
    }

    #[test]
    fn short_input_yields_empty() {
        assert!(FftTdr.compute(&[]).is_empty());
        assert!(FftTdr
            .compute(&flat(1, Complex64::new(1.0, 0.0)))
            .is_empty());
    }

    #[test]
    fn short_circuit_steps_to_minus_one() {
        let tdr = FftTdr.compute(&flat(101, Complex64::new(-1.0, 0.0)));
        assert!(!tdr.is_empty());
        // A flat reflection is an impulse at t=0
        assert!(tdr[0].impulse_response < 0.0);
        assert!(tdr[0].impulse_response.abs() > tdr[10].impulse_response.abs());
        let settled = tdr[tdr.len() / 2].step_response;
        assert!((settled + 1.0).abs() < 0.05, "step settled at {}", settled);
        let end = tdr[tdr.len() - 1].step_response;
        assert!((end + 1.0).abs() < 1e-9);
    }

    #[test]
    fn time_axis_spacing() {
        let samples = flat(50, Complex64::new(0.0, 0.0));
        let tdr = FftTdr.compute(&samples);
        let fft_len = (2 * 51usize).next_power_of_two();
        let dt = 1.0 / (fft_len as f64 * 1.0e6);
        assert_eq!(tdr.len(), fft_len / 2);
        assert!((tdr[1].time - dt).abs() < 1e-18);
    }
}
