//! # Signal Conditioner Module
//!
//! Fixed gain followed by dynamic-range compression, applied to every frame
//! before it is metered and analysed. Weak phone and laptop microphones need
//! the gain; the compressor keeps loud input from swamping the estimator.
//!
//! The conditioner is a pure function of the frame. The compressor envelope
//! starts from rest on every call, so nothing is smoothed across frames.

use crate::config::{
    COMPRESSOR_ATTACK_SECS, COMPRESSOR_KNEE_DB, COMPRESSOR_RATIO, COMPRESSOR_RELEASE_SECS,
    COMPRESSOR_THRESHOLD_DB, INPUT_GAIN,
};
use crate::frame::{AudioFrame, ConditionedFrame};

/// Level reported for a zero envelope.
const SILENCE_DB: f64 = -120.0;

/// Exponent applied to the full-scale gain reduction to derive makeup gain.
const MAKEUP_EXPONENT: f64 = 0.6;

/// Feed-forward peak compressor with a soft knee above the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Compressor {
    /// Threshold in dB.
    pub threshold: f64,
    /// Width in dB of the region above the threshold where the curve bends.
    pub knee: f64,
    /// Compression ratio, e.g. 12.0 = 12:1.
    pub ratio: f64,
    /// Attack time in seconds. Zero follows peaks instantly.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            threshold: f64::from(COMPRESSOR_THRESHOLD_DB),
            knee: f64::from(COMPRESSOR_KNEE_DB),
            ratio: f64::from(COMPRESSOR_RATIO),
            attack: f64::from(COMPRESSOR_ATTACK_SECS),
            release: f64::from(COMPRESSOR_RELEASE_SECS),
        }
    }
}

impl Compressor {
    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            SILENCE_DB
        } else {
            20.0 * linear.log10()
        }
    }

    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Static transfer curve: output level in dB for an input level in dB.
    pub fn output_level(&self, input_db: f64) -> f64 {
        let slope = 1.0 / self.ratio;
        let knee_end = self.threshold + self.knee;

        if input_db <= self.threshold {
            input_db
        } else if self.knee > 0.0 && input_db < knee_end {
            // Quadratic bend from slope 1 down to 1/ratio
            let x = input_db - self.threshold;
            input_db + (slope - 1.0) * x * x / (2.0 * self.knee)
        } else {
            let at_knee_end = knee_end - (1.0 - slope) * self.knee / 2.0;
            at_knee_end + (input_db - knee_end) * slope
        }
    }

    /// Gain that restores a full-scale input after compression.
    pub fn makeup_gain_db(&self) -> f64 {
        -MAKEUP_EXPONENT * self.output_level(0.0)
    }

    /// Smoothing coefficient for a time constant, zero for instant response.
    fn coefficient(time_secs: f64, sample_rate: f64) -> f64 {
        if time_secs <= 0.0 || sample_rate <= 0.0 {
            0.0
        } else {
            (-1.0 / (time_secs * sample_rate)).exp()
        }
    }

    /// Compresses a block of samples in place, starting from a rested envelope.
    pub fn process_block(&self, samples: &mut [f32], sample_rate: u32) {
        let sample_rate = f64::from(sample_rate);
        let attack_coef = Self::coefficient(self.attack, sample_rate);
        let release_coef = Self::coefficient(self.release, sample_rate);
        let makeup = self.makeup_gain_db();
        let mut envelope = 0.0_f64;

        for sample in samples.iter_mut() {
            let level = f64::from(sample.abs());
            let coef = if level > envelope { attack_coef } else { release_coef };
            envelope = coef * envelope + (1.0 - coef) * level;

            let envelope_db = Self::linear_to_db(envelope);
            let gain_db = self.output_level(envelope_db) - envelope_db + makeup;
            *sample = (f64::from(*sample) * Self::db_to_linear(gain_db)) as f32;
        }
    }
}

/// Gain stage followed by the compressor.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConditioner {
    gain: f32,
    compressor: Compressor,
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self { gain: INPUT_GAIN, compressor: Compressor::default() }
    }
}

impl SignalConditioner {
    pub fn new(gain: f32, compressor: Compressor) -> Self {
        Self { gain, compressor }
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Applies gain then compression, returning a new frame.
    pub fn condition(&self, frame: &AudioFrame) -> ConditionedFrame {
        let mut samples: Vec<f32> = frame.samples().iter().map(|&s| s * self.gain).collect();
        self.compressor.process_block(&mut samples, frame.sample_rate());
        ConditionedFrame::from_source(frame, samples)
    }
}
