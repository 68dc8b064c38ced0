// tuner-core/src/lib.rs

//! The core logic for the real-time vocal tuner.
//! This crate is responsible for audio capture, signal conditioning,
//! pitch estimation and the streaming link to the note-mapping service.
//! It is completely headless and contains no presentation code.

pub mod audio;
pub mod conditioner;
pub mod config;
pub mod error;
pub mod frame;
pub mod meter;
pub mod pitch;
pub mod scheduler;
pub mod streaming;
pub mod tuning;

pub use error::TunerError;
pub use frame::{AudioFrame, ConditionedFrame};
pub use meter::LoudnessSample;
pub use pitch::{PitchEstimate, NO_PITCH};

/// Represents the result of a single audio analysis frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    /// Loudness of the conditioned frame, published every tick.
    pub loudness: LoudnessSample,
    /// Whether the frame passed the energy gate.
    pub active: bool,
    /// Raw estimator output in Hz, [`NO_PITCH`] when nothing was found or
    /// the gate was closed.
    pub frequency: f32,
    /// The estimate accepted for transmission, if any.
    pub estimate: Option<PitchEstimate>,
}
