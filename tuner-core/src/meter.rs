//! # Level Meter Module
//!
//! Short-term loudness of a frame. The RMS value gates the pitch estimator;
//! the display percentage is advisory telemetry only.

use crate::config::{LEVEL_SCALE, RMS_FLOOR};

/// Loudness of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoudnessSample {
    /// Root-mean-square amplitude of the frame.
    pub rms: f32,
    /// Display level in percent, always within `[0, 100]`.
    pub level_percent: f32,
}

impl LoudnessSample {
    /// Whether the frame carries enough energy to be analysed.
    ///
    /// The floor is deliberately tiny so that whispers survive the gain
    /// stage; noise that gets through is left to the frequency band filter.
    pub fn is_active(&self) -> bool {
        self.rms > RMS_FLOOR
    }
}

/// Computes the loudness of a frame.
pub fn measure(samples: &[f32]) -> LoudnessSample {
    let rms = rms(samples);
    LoudnessSample { rms, level_percent: level_percent(rms) }
}

/// Root-mean-square of `samples`, zero for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Maps an RMS value onto the `[0, 100]` display scale.
pub fn level_percent(rms: f32) -> f32 {
    let level = rms * LEVEL_SCALE;
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, 100.0)
}

/// Verdict of a microphone sensitivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityRating {
    Optimal,
    Good,
    Low,
    NoSignal,
}

impl SensitivityRating {
    /// Rates a display level observed while the user speaks normally.
    pub fn from_level(level_percent: f32) -> Self {
        if level_percent > 30.0 {
            SensitivityRating::Optimal
        } else if level_percent > 10.0 {
            SensitivityRating::Good
        } else if level_percent > 1.0 {
            SensitivityRating::Low
        } else {
            SensitivityRating::NoSignal
        }
    }

    /// Advice shown to the user for this rating.
    pub fn advice(&self) -> &'static str {
        match self {
            SensitivityRating::Optimal => "sensitivity is optimal, the microphone works well",
            SensitivityRating::Good => "sensitivity is good, you may speak a little louder",
            SensitivityRating::Low => "sensitivity is low, move closer to the microphone",
            SensitivityRating::NoSignal => "no audio detected, check the input device",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_frame_is_inactive() {
        let sample = measure(&[0.0; 4096]);
        assert_eq!(sample.rms, 0.0);
        assert_eq!(sample.level_percent, 0.0);
        assert!(!sample.is_active());
    }

    #[test]
    fn empty_frame_measures_zero() {
        assert_eq!(measure(&[]), LoudnessSample::default());
    }

    #[test]
    fn square_wave_rms_equals_amplitude() {
        let samples: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.25 } else { -0.25 }).collect();
        let sample = measure(&samples);
        assert!((sample.rms - 0.25).abs() < 1e-6);
        assert!((sample.level_percent - 50.0).abs() < 1e-3);
        assert!(sample.is_active());
    }

    #[test]
    fn level_is_clamped() {
        for rms in [0.0, 1e-6, 0.1, 0.5, 0.9, 10.0, f32::INFINITY, f32::NAN] {
            let level = level_percent(rms);
            assert!((0.0..=100.0).contains(&level), "level {level} for rms {rms}");
        }
        assert_eq!(level_percent(3.0), 100.0);
    }

    #[test]
    fn gate_is_strictly_above_floor() {
        let at_floor = LoudnessSample { rms: RMS_FLOOR, level_percent: 0.0 };
        let above = LoudnessSample { rms: RMS_FLOOR * 1.5, level_percent: 0.0 };
        assert!(!at_floor.is_active());
        assert!(above.is_active());
    }

    #[test]
    fn sensitivity_ratings() {
        assert_eq!(SensitivityRating::from_level(45.0), SensitivityRating::Optimal);
        assert_eq!(SensitivityRating::from_level(30.0), SensitivityRating::Good);
        assert_eq!(SensitivityRating::from_level(5.0), SensitivityRating::Low);
        assert_eq!(SensitivityRating::from_level(1.0), SensitivityRating::NoSignal);
    }
}
