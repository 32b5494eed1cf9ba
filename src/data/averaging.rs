//! Sweep averaging.
//!
//! Each point index owns an accumulator `(sum, count)`. A value arriving for a
//! point is added to that point's accumulator and the running mean is returned.
//! Accumulation is a block mean, not a sliding window: once a point has seen
//! `requested_averages` values, its next value starts a fresh block.
//!
//! The averager must be [`reset`](SweepAverager::reset) whenever the point count,
//! the averaging target or any acquisition setting changes, otherwise values
//! taken under different configurations would be mixed.

use crate::measurement_types::{Sample, VnaDatapoint};
use num_complex::Complex64;
use tracing::trace;

/// Values that can be summed and scaled.
pub trait Accumulate: Copy {
    /// Additive identity
    fn zero() -> Self;
    /// Component-wise sum
    fn add(self, other: Self) -> Self;
    /// Component-wise scale
    fn scale(self, factor: f64) -> Self;
}

impl Accumulate for Complex64 {
    fn zero() -> Self {
        Complex64::new(0.0, 0.0)
    }

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn scale(self, factor: f64) -> Self {
        self * factor
    }
}

/// All four S-parameters of one point.
impl Accumulate for [Complex64; 4] {
    fn zero() -> Self {
        [Complex64::new(0.0, 0.0); 4]
    }

    fn add(self, other: Self) -> Self {
        let mut out = self;
        for (o, v) in out.iter_mut().zip(other) {
            *o += v;
        }
        out
    }

    fn scale(self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot<V> {
    sum: V,
    count: u32,
}

/// Running per-point mean over consecutive sweeps.
#[derive(Clone, Debug)]
pub struct SweepAverager<V: Accumulate = [Complex64; 4]> {
    slots: Vec<Slot<V>>,
    requested_averages: u32,
    completed_sweeps: u32,
    current_sweep: u32,
    current_point: u32,
}

impl<V: Accumulate> SweepAverager<V> {
    /// Averager for `total_points` points and `averages` sweeps (at least one).
    pub fn new(total_points: usize, averages: u32) -> Self {
        let mut averager = Self {
            slots: Vec::new(),
            requested_averages: averages.max(1),
            completed_sweeps: 0,
            current_sweep: 0,
            current_point: 0,
        };
        averager.reset(total_points);
        averager
    }

    /// Discard all accumulated data and resize for `total_points` points.
    pub fn reset(&mut self, total_points: usize) {
        self.slots = vec![
            Slot {
                sum: V::zero(),
                count: 0
            };
            total_points
        ];
        self.completed_sweeps = 0;
        self.current_sweep = 0;
        self.current_point = 0;
    }

    /// Change the averaging target. Accumulated data is discarded.
    pub fn set_averages(&mut self, averages: u32) {
        self.requested_averages = averages.max(1);
        self.reset(self.slots.len());
    }

    /// Fold a value into the accumulator of `point_index` and return the mean.
    ///
    /// Indices outside the configured point count pass through unchanged.
    pub fn process_value(&mut self, point_index: usize, value: V) -> V {
        let total = self.slots.len();
        let Some(slot) = self.slots.get_mut(point_index) else {
            return value;
        };
        if slot.count >= self.requested_averages {
            slot.sum = V::zero();
            slot.count = 0;
        }
        slot.sum = slot.sum.add(value);
        slot.count += 1;
        let mean = slot.sum.scale(1.0 / f64::from(slot.count));

        self.current_sweep = slot.count;
        self.current_point = point_index as u32;
        if point_index + 1 == total {
            self.completed_sweeps = self.completed_sweeps.saturating_add(1);
            trace!(
                completed = self.completed_sweeps,
                target = self.requested_averages,
                "Averaging sweep complete"
            );
        }
        mean
    }

    /// Number of values folded into the most recently processed point (1-based).
    pub fn current_sweep(&self) -> u32 {
        self.current_sweep
    }

    /// Index of the most recently processed point.
    pub fn current_point(&self) -> u32 {
        self.current_point
    }

    /// Sweeps completed since the last reset, capped at the averaging target.
    pub fn completed_level(&self) -> u32 {
        self.completed_sweeps.min(self.requested_averages)
    }

    /// Sweeps completed since the last reset, uncapped.
    pub fn completed_sweeps(&self) -> u32 {
        self.completed_sweeps
    }

    /// Averaging target.
    pub fn requested_averages(&self) -> u32 {
        self.requested_averages
    }

    /// Configured point count.
    pub fn total_points(&self) -> usize {
        self.slots.len()
    }
}

impl SweepAverager<Complex64> {
    /// Average a single-parameter sample at `point_index`.
    pub fn process(&mut self, sample: Sample, point_index: usize) -> Sample {
        let value = self.process_value(point_index, sample.value);
        Sample::new(sample.frequency, value)
    }
}

impl SweepAverager<[Complex64; 4]> {
    /// Average all four S-parameters of a datapoint.
    pub fn process_datapoint(&mut self, dp: VnaDatapoint) -> VnaDatapoint {
        let averaged = self.process_value(dp.point_index as usize, [dp.s11, dp.s12, dp.s21, dp.s22]);
        let [s11, s12, s21, s22] = averaged;
        VnaDatapoint {
            s11,
            s12,
            s21,
            s22,
            ..dp
        }
    }
}
