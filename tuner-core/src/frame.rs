//! Frames of samples handed from the audio source to the analysis stages.

use std::time::{SystemTime, UNIX_EPOCH};

/// One window of mono samples as captured from the input.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    /// Capture time in seconds since the Unix epoch.
    timestamp: f64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, timestamp: f64) -> Self {
        Self { samples, sample_rate, timestamp }
    }

    /// Builds a frame stamped with the current wall-clock time.
    pub fn captured_now(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, unix_time_secs())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A frame after gain and compression. Same shape as the captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    timestamp: f64,
}

impl ConditionedFrame {
    pub(crate) fn from_source(source: &AudioFrame, samples: Vec<f32>) -> Self {
        Self {
            samples,
            sample_rate: source.sample_rate,
            timestamp: source.timestamp,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
