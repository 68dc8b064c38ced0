use thiserror::Error;

/// Errors surfaced by the analysis loop and the service link.
#[derive(Debug, Error)]
pub enum TunerError {
    /// The scheduler was asked to tick with no frame source attached.
    #[error("no analysis engine attached to the scheduler")]
    AnalyserUnavailable,

    /// The capture stream stopped delivering samples.
    #[error("audio capture disconnected")]
    CaptureDisconnected,

    /// The transport refused an outgoing message.
    #[error("transport error: {0}")]
    Transport(String),

    /// A note catalog could not be decoded.
    #[error("invalid note catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}
