//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! The device callback pushes raw sample chunks over a channel; the analysis
//! side keeps the most recent [`BUFFER_SIZE`] samples as a rolling window and
//! hands a copy of it to the scheduler on every tick.
//!
//! ## Features
//! - Default input device selection with configurable sample rate
//! - Mono capture, taking the first channel of multi-channel devices
//! - Non-blocking hand-off from the audio callback

use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::config::BUFFER_SIZE;
use crate::error::TunerError;
use crate::frame::AudioFrame;
use crate::scheduler::FrameSource;

/// Number of callback chunks that may queue up between two ticks.
const CHUNK_QUEUE: usize = 64;

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `sender` - Channel receiving mono sample chunks from the audio callback
/// * `target_rate` - Preferred sample rate in Hz
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and actual sample rate
/// * `Err(e)` - Error if no device or no usable f32 format is available
pub fn start_audio_capture(sender: Sender<Vec<f32>>, target_rate: u32) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!(device = %device.name()?, "using audio input device");

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let sample_rate = config.sample_rate().0;
    let channels = usize::from(config.channels()).max(1);
    let config: cpal::StreamConfig = config.into();

    info!(sample_rate, channels, "selected input format");

    let err_fn = |err| warn!(error = %err, "an error occurred on the audio stream");

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let chunk: Vec<f32> = if channels == 1 {
                data.to_vec()
            } else {
                data.iter().step_by(channels).copied().collect()
            };
            // Drop the chunk if the analysis side is behind.
            let _ = sender.try_send(chunk);
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Names of the available input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let names = host
        .input_devices()?
        .map(|device| device.name().unwrap_or_else(|_| "Unknown Device".to_string()))
        .collect();
    Ok(names)
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Only 32-bit float formats are considered. Mono wins over multi-channel,
/// then the range closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let distance = if target_rate < c.min_sample_rate().0 {
                c.min_sample_rate().0 - target_rate
            } else {
                target_rate.saturating_sub(c.max_sample_rate().0)
            };
            (c.channels() != 1, distance)
        })
}

/// The most recent `capacity` samples of a stream, zero-filled at start.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl AnalysisWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: std::iter::repeat_n(0.0, capacity).collect(),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &[f32]) {
        let skip = chunk.len().saturating_sub(self.capacity);
        for &sample in &chunk[skip..] {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }
}

/// Frame source fed by a channel of sample chunks.
pub struct ChannelSource {
    receiver: Receiver<Vec<f32>>,
    window: AnalysisWindow,
    sample_rate: u32,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            receiver,
            window: AnalysisWindow::new(BUFFER_SIZE),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<AudioFrame, TunerError> {
        loop {
            match self.receiver.try_recv() {
                Ok(chunk) => self.window.push(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(TunerError::CaptureDisconnected),
            }
        }
        Ok(AudioFrame::captured_now(self.window.to_vec(), self.sample_rate))
    }
}

/// A live microphone stream acting as the scheduler's analysis engine.
///
/// The stream is not `Send`; create it on the thread that runs the scheduler.
pub struct CaptureSource {
    stream: cpal::Stream,
    source: ChannelSource,
}

impl CaptureSource {
    /// Opens the default input device.
    pub fn open(target_rate: u32) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(CHUNK_QUEUE);
        let (stream, sample_rate) = start_audio_capture(tx, target_rate)?;
        Ok(Self { stream, source: ChannelSource::new(rx, sample_rate) })
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }
}

impl FrameSource for CaptureSource {
    fn next_frame(&mut self) -> Result<AudioFrame, TunerError> {
        self.source.next_frame()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            debug!(error = %e, "error pausing stream");
        }
    }
}
