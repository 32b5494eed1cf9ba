//! Peak and extremum search over frequency-ascending series.

use crate::data::transforms::magnitude_db;
use crate::measurement_types::Sample;

/// A detected peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakRecord {
    /// Frequency in Hz
    pub frequency: f64,
    /// Peak level in dB
    pub level_dbm: f64,
}

/// Single-pass peak detection.
///
/// A running maximum becomes a candidate once the signal has risen at least
/// `min_valley_db` above the running minimum. The candidate is committed when
/// the signal falls `min_valley_db` below it, provided it reached `min_level_dbm`.
/// If more than `max_peaks` peaks are found the highest ones are kept; the result
/// is always ordered by ascending frequency. Equal levels keep the lower
/// frequency first.
pub fn find_peak_records(
    samples: &[Sample],
    max_peaks: usize,
    min_level_dbm: f64,
    min_valley_db: f64,
) -> Vec<PeakRecord> {
    let mut peaks = Vec::new();
    let mut frequency = 0.0;
    let mut max_dbm = -200.0;
    let mut min_dbm = 200.0;

    for sample in samples {
        let dbm = magnitude_db(sample.value);
        if dbm >= max_dbm && min_dbm <= dbm - min_valley_db {
            frequency = sample.frequency;
            max_dbm = dbm;
        }
        if dbm <= min_dbm {
            min_dbm = dbm;
        }
        if dbm <= max_dbm - min_valley_db && max_dbm >= min_level_dbm {
            peaks.push(PeakRecord {
                frequency,
                level_dbm: max_dbm,
            });
            frequency = 0.0;
            max_dbm = dbm;
            min_dbm = dbm;
        }
    }

    if peaks.len() > max_peaks {
        peaks.sort_by(|a, b| b.level_dbm.total_cmp(&a.level_dbm));
        peaks.truncate(max_peaks);
        peaks.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    }
    peaks
}

/// Frequencies of the peaks found by [`find_peak_records`].
pub fn find_peaks(
    samples: &[Sample],
    max_peaks: usize,
    min_level_dbm: f64,
    min_valley_db: f64,
) -> Vec<f64> {
    find_peak_records(samples, max_peaks, min_level_dbm, min_valley_db)
        .into_iter()
        .map(|p| p.frequency)
        .collect()
}

/// Frequency of the largest (or smallest) magnitude.
///
/// Returns 0 for an empty series. A maximum search also returns 0 if every
/// magnitude is zero.
pub fn find_extremum_freq(samples: &[Sample], find_maximum: bool) -> f64 {
    let mut compare = if find_maximum {
        f64::MIN_POSITIVE
    } else {
        f64::MAX
    };
    let mut freq = 0.0;
    for sample in samples {
        let amplitude = sample.magnitude();
        if (find_maximum && amplitude > compare) || (!find_maximum && amplitude < compare) {
            compare = amplitude;
            freq = sample.frequency;
        }
    }
    freq
}
