//! # Configuration Module
//!
//! Policy constants for the analysis pipeline and the runtime settings of a
//! tuner session.
//!
//! The numeric constants were tuned empirically for weak phone and laptop
//! microphones. The acceptance bands must stay exactly as they are: the
//! note-mapping service and its clients rely on them.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Number of samples in one analysis window.
///
/// The estimator is quadratic in the window length, so this bound keeps the
/// per-tick cost predictable.
pub const BUFFER_SIZE: usize = 4096;

/// Sample rate requested from the input device.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Fixed pre-amplification applied before compression.
pub const INPUT_GAIN: f32 = 25.0;

// Dynamics compressor settings.
pub const COMPRESSOR_THRESHOLD_DB: f32 = -50.0;
pub const COMPRESSOR_KNEE_DB: f32 = 40.0;
pub const COMPRESSOR_RATIO: f32 = 12.0;
pub const COMPRESSOR_ATTACK_SECS: f32 = 0.0;
pub const COMPRESSOR_RELEASE_SECS: f32 = 0.25;

/// A frame is active only when its RMS is strictly above this floor.
pub const RMS_FLOOR: f32 = 1e-5;

/// Multiplier from RMS to the display percentage. Not configurable.
pub const LEVEL_SCALE: f32 = 200.0;

/// Minimum autocorrelation value accepted as a pitch period.
pub const CORRELATION_FLOOR: f32 = 0.01;

/// Lowest frequency the lag search looks for.
pub const SEARCH_MIN_HZ: f32 = 80.0;
/// Highest frequency the lag search looks for.
pub const SEARCH_MAX_HZ: f32 = 800.0;

/// Inclusive lower edge of the emission band.
pub const EMIT_MIN_HZ: f32 = 80.0;
/// Exclusive upper edge of the emission band.
///
/// Wider than [`SEARCH_MAX_HZ`]; anything between the two can only be an
/// artifact of the lag search.
pub const EMIT_MAX_HZ: f32 = 2000.0;

/// Delay before the single reconnection attempt after a close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Deviation, in cents, still considered in tune.
pub const IN_TUNE_CENTS: i32 = 10;

/// Returns true when `frequency` may be sent to the note-mapping service.
pub fn in_emission_band(frequency: f32) -> bool {
    frequency >= EMIT_MIN_HZ && frequency < EMIT_MAX_HZ
}

/// Runtime settings for a tuner session.
///
/// Every field has a default, so a partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Base URL of the note-mapping service, `http://` or `https://`.
    pub server_url: String,
    /// Sample rate requested from the microphone.
    pub sample_rate: u32,
    /// Analysis ticks per second.
    pub frame_rate: u32,
    /// Tolerance for the in-tune indicator.
    pub in_tune_cents: i32,
    /// Display label of the target note, e.g. `"A4"`.
    pub target_note: Option<String>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8001".to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_rate: 60,
            in_tune_cents: IN_TUNE_CENTS,
            target_note: None,
        }
    }
}

impl TunerConfig {
    /// Loads a configuration file, falling back to defaults for missing keys.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// WebSocket endpoint of the service: `ws(s)://host/ws`.
    pub fn websocket_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        if let Some(host) = base.strip_prefix("https://") {
            format!("wss://{host}/ws")
        } else if let Some(host) = base.strip_prefix("http://") {
            format!("ws://{host}/ws")
        } else {
            format!("ws://{base}/ws")
        }
    }

    /// Endpoint serving the catalog of target notes.
    pub fn notes_url(&self) -> String {
        format!("{}/notes", self.server_url.trim_end_matches('/'))
    }

    /// Interval between two analysis ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_band_edges() {
        assert!(in_emission_band(80.0));
        assert!(in_emission_band(1999.9));
        assert!(!in_emission_band(2000.0));
        assert!(!in_emission_band(79.9));
        assert!(!in_emission_band(-1.0));
    }

    #[test]
    fn service_urls_follow_scheme() {
        let mut config = TunerConfig::default();
        assert_eq!(config.websocket_url(), "ws://localhost:8001/ws");
        assert_eq!(config.notes_url(), "http://localhost:8001/notes");

        config.server_url = "https://pitch.example.org/".to_string();
        assert_eq!(config.websocket_url(), "wss://pitch.example.org/ws");
        assert_eq!(config.notes_url(), "https://pitch.example.org/notes");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TunerConfig = serde_json::from_str(r#"{"frame_rate": 30}"#).unwrap();
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.in_tune_cents, IN_TUNE_CENTS);
    }
}
