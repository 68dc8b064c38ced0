//! # Frame Scheduler Module
//!
//! The per-frame control loop. While listening, every tick pulls one frame
//! from the source, runs it through conditioner, meter and estimator, and
//! forwards accepted estimates to a [`PitchSink`].
//!
//! The loop is cooperative: a tick is re-armed only while the scheduler is
//! still listening, so a stop is observed by the next tick at the latest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, trace};

use crate::conditioner::SignalConditioner;
use crate::error::TunerError;
use crate::frame::AudioFrame;
use crate::meter::{self, LoudnessSample};
use crate::pitch::{NO_PITCH, PitchEstimate, PitchEstimator};
use crate::FrameAnalysis;

/// Delivers one analysis window per tick.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<AudioFrame, TunerError>;
}

/// Receives estimates that passed the gate and the emission band.
pub trait PitchSink {
    fn publish(&self, estimate: &PitchEstimate);
}

impl<T: PitchSink + ?Sized> PitchSink for Arc<T> {
    fn publish(&self, estimate: &PitchEstimate) {
        (**self).publish(estimate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Idle,
    Listening,
}

/// Cloneable handle that stops a scheduler from another thread.
#[derive(Debug, Clone)]
pub struct ListenHandle {
    listening: Arc<AtomicBool>,
}

impl ListenHandle {
    pub fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

/// Runs the analysis stages over one frame. Pure: no state is kept.
pub fn analyse_frame(
    conditioner: &SignalConditioner,
    estimator: &PitchEstimator,
    frame: &AudioFrame,
) -> FrameAnalysis {
    let conditioned = conditioner.condition(frame);
    let loudness = meter::measure(conditioned.samples());
    let active = loudness.is_active();

    let frequency = if active {
        estimator.estimate(conditioned.samples(), conditioned.sample_rate())
    } else {
        NO_PITCH
    };

    let estimate = PitchEstimate {
        frequency,
        amplitude: loudness.rms,
        timestamp: conditioned.timestamp(),
    };

    FrameAnalysis {
        loudness,
        active,
        frequency,
        estimate: (active && estimate.in_emission_band()).then_some(estimate),
    }
}

/// Drives the analysis pipeline once per tick.
pub struct FrameScheduler<K: PitchSink> {
    listening: Arc<AtomicBool>,
    source: Option<Box<dyn FrameSource>>,
    conditioner: SignalConditioner,
    estimator: PitchEstimator,
    sink: K,
    observer: Option<Sender<FrameAnalysis>>,
    last_loudness: LoudnessSample,
}

impl<K: PitchSink> FrameScheduler<K> {
    pub fn new(sink: K) -> Self {
        Self {
            listening: Arc::new(AtomicBool::new(false)),
            source: None,
            conditioner: SignalConditioner::default(),
            estimator: PitchEstimator::default(),
            sink,
            observer: None,
            last_loudness: LoudnessSample::default(),
        }
    }

    /// Attaches the analysis engine that supplies frames.
    pub fn attach_source(&mut self, source: Box<dyn FrameSource>) {
        self.source = Some(source);
    }

    pub fn detach_source(&mut self) -> Option<Box<dyn FrameSource>> {
        self.source.take()
    }

    /// Publishes every tick's analysis to `observer`. Reports are dropped
    /// rather than blocking when the observer falls behind.
    pub fn set_observer(&mut self, observer: Sender<FrameAnalysis>) {
        self.observer = Some(observer);
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn handle(&self) -> ListenHandle {
        ListenHandle { listening: Arc::clone(&self.listening) }
    }

    pub fn state(&self) -> ListenState {
        if self.listening.load(Ordering::SeqCst) {
            ListenState::Listening
        } else {
            ListenState::Idle
        }
    }

    /// Latest advisory level, updated on every tick.
    pub fn loudness(&self) -> LoudnessSample {
        self.last_loudness
    }

    pub fn start(&mut self) {
        if !self.listening.swap(true, Ordering::SeqCst) {
            info!("listening started");
        }
    }

    pub fn stop(&mut self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            info!("listening stopped");
        }
    }

    /// Runs one analysis pass regardless of the listening state.
    ///
    /// A missing frame source is fatal: the scheduler drops back to idle and
    /// the error is returned.
    pub fn tick(&mut self) -> Result<FrameAnalysis, TunerError> {
        let frame = match self.source.as_mut() {
            Some(source) => source.next_frame(),
            None => Err(TunerError::AnalyserUnavailable),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "cannot acquire frame, halting analysis");
                self.stop();
                return Err(e);
            }
        };

        let analysis = analyse_frame(&self.conditioner, &self.estimator, &frame);
        self.last_loudness = analysis.loudness;

        if let Some(estimate) = &analysis.estimate {
            trace!(frequency = estimate.frequency, rms = estimate.amplitude, "pitch accepted");
            self.sink.publish(estimate);
        }

        if let Some(observer) = &self.observer {
            if let Err(TrySendError::Disconnected(_)) = observer.try_send(analysis.clone()) {
                debug!("analysis observer went away");
                self.observer = None;
            }
        }

        Ok(analysis)
    }

    /// Ticks once if listening. Returns whether the next tick is armed.
    pub fn step(&mut self) -> Result<bool, TunerError> {
        if self.state() != ListenState::Listening {
            return Ok(false);
        }
        self.tick()?;
        Ok(self.state() == ListenState::Listening)
    }

    /// Ticks on every signal from `ticker` until stopped.
    ///
    /// The first tick runs immediately. A closed ticker stops the loop.
    pub fn run(&mut self, ticker: &Receiver<Instant>) -> Result<(), TunerError> {
        while self.step()? {
            if ticker.recv().is_err() {
                debug!("frame ticker closed");
                self.stop();
            }
        }
        Ok(())
    }
}
