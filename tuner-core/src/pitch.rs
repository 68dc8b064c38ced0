//! # Pitch Detection Module
//!
//! Fundamental-frequency estimation by time-domain autocorrelation, tuned for
//! the singing voice.
//!
//! ## Features
//! - Lag search restricted to periods between 80 Hz and 800 Hz
//! - First-minimum skip to discard the zero-lag peak
//! - Key-maximum selection to avoid locking onto sub-harmonics
//! - Parabolic interpolation for sub-sample accuracy
//!
//! The cost is quadratic in the frame length, which is bounded by
//! [`BUFFER_SIZE`](crate::config::BUFFER_SIZE).

use serde::{Deserialize, Serialize};

use crate::config::{self, CORRELATION_FLOOR, SEARCH_MAX_HZ, SEARCH_MIN_HZ};

/// Frequency reported when a frame has no usable pitch.
pub const NO_PITCH: f32 = -1.0;

/// A maximum at least this fraction of the window maximum counts as the period.
const KEY_MAXIMUM_RATIO: f64 = 0.9;

/// Relative spread below which the autocorrelation is considered flat.
const FLATNESS_TOLERANCE: f64 = 1e-9;

/// One frequency estimate for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz, or [`NO_PITCH`].
    pub frequency: f32,
    /// RMS of the conditioned frame.
    pub amplitude: f32,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
}

impl PitchEstimate {
    pub fn has_pitch(&self) -> bool {
        self.frequency > 0.0
    }

    /// Whether this estimate may leave the core.
    pub fn in_emission_band(&self) -> bool {
        config::in_emission_band(self.frequency)
    }
}

/// Autocorrelation pitch estimator. Holds only its search parameters, so
/// the same frame always yields the same estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchEstimator {
    min_frequency: f32,
    max_frequency: f32,
    correlation_floor: f32,
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self {
            min_frequency: SEARCH_MIN_HZ,
            max_frequency: SEARCH_MAX_HZ,
            correlation_floor: CORRELATION_FLOOR,
        }
    }
}

impl PitchEstimator {
    /// Estimates the fundamental frequency of a frame.
    ///
    /// # Arguments
    /// * `samples` - Conditioned time-domain samples
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * The frequency in Hz, or [`NO_PITCH`] for silence, DC, noise and
    ///   frames whose strongest period lies outside the search band
    pub fn estimate(&self, samples: &[f32], sample_rate: u32) -> f32 {
        let corr = autocorrelation(samples);
        let lag_count = corr.len();
        if lag_count < 3 || sample_rate == 0 {
            return NO_PITCH;
        }

        // Skip the zero-lag peak: walk down to the first local minimum
        let mut first_min = 1;
        while first_min < lag_count - 1 && corr[first_min] > corr[first_min + 1] {
            first_min += 1;
        }

        let sr = sample_rate as f32;
        let min_period = (sr / self.max_frequency).floor() as usize;
        let max_period = (sr / self.min_frequency).floor() as usize;
        let start = first_min.max(min_period);
        let end = lag_count.min(max_period + 1);
        if start >= end {
            return NO_PITCH;
        }

        let window = &corr[start..end];
        let Some((offset, max_val)) = window
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, value)| match best {
                Some((_, best_val)) if value <= best_val => best,
                _ => Some((i, value)),
            })
        else {
            return NO_PITCH;
        };

        if max_val < f64::from(self.correlation_floor) {
            return NO_PITCH;
        }

        // Silence and DC leave the autocorrelation flat across the window
        let min_val = window.iter().copied().fold(f64::INFINITY, f64::min);
        if max_val - min_val <= FLATNESS_TOLERANCE * corr[0].abs() {
            return NO_PITCH;
        }

        let max_pos = key_maximum(&corr, start, start + offset);
        let period = refine_lag(&corr, max_pos);
        let frequency = sr / period as f32;

        if frequency.is_finite() && frequency > 0.0 {
            frequency
        } else {
            NO_PITCH
        }
    }
}

/// Normalised autocorrelation for lags `0..samples.len() / 2`.
///
/// Each lag is divided by the number of overlapping products, so long lags
/// are not penalised. Sums are accumulated in `f64`.
pub fn autocorrelation(samples: &[f32]) -> Vec<f64> {
    let n = samples.len();
    (0..n / 2)
        .map(|lag| {
            let sum: f64 = samples[..n - lag]
                .iter()
                .zip(&samples[lag..])
                .map(|(&a, &b)| f64::from(a) * f64::from(b))
                .sum();
            sum / (n - lag) as f64
        })
        .collect()
}

/// Picks the first local maximum in `start..max_pos` that comes close to the
/// window maximum. A periodic signal peaks at every multiple of its period
/// with nearly equal height; the earliest of them is the period itself.
///
/// Heights are compared at the interpolated vertex, since a period that
/// falls between two lags leaves its sampled peak visibly short.
fn key_maximum(corr: &[f64], start: usize, max_pos: usize) -> usize {
    let (_, max_height) = parabolic_peak(corr, max_pos);
    let threshold = KEY_MAXIMUM_RATIO * max_height.max(corr[max_pos]);
    (start..max_pos)
        .find(|&i| {
            i > 0
                && corr[i] > corr[i - 1]
                && corr[i] >= corr[i + 1]
                && parabolic_peak(corr, i).1 >= threshold
        })
        .unwrap_or(max_pos)
}

/// Fits a parabola through the neighbours of `lag` and returns its vertex.
fn refine_lag(corr: &[f64], lag: usize) -> f64 {
    parabolic_peak(corr, lag).0
}

/// Vertex `(lag, height)` of the parabola through `corr[lag - 1..=lag + 1]`.
///
/// Falls back to the sampled point at either boundary, for a degenerate
/// parabola, or when the vertex lies more than one lag away.
fn parabolic_peak(corr: &[f64], lag: usize) -> (f64, f64) {
    let sampled = (lag as f64, corr[lag]);
    if lag == 0 || lag + 1 >= corr.len() {
        return sampled;
    }

    let x1 = corr[lag - 1];
    let x2 = corr[lag];
    let x3 = corr[lag + 1];
    let a = (x1 - 2.0 * x2 + x3) / 2.0;
    let b = (x3 - x1) / 2.0;
    if a == 0.0 {
        return sampled;
    }

    let shift = -b / (2.0 * a);
    if shift.abs() <= 1.0 {
        (lag as f64 + shift, x2 - b * b / (4.0 * a))
    } else {
        sampled
    }
}
