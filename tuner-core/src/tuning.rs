//! # Musical Tuning Module
//!
//! Target notes and the comparison of a detected pitch against them.
//!
//! The list of available targets is curated by the note-mapping service and
//! consumed here as an opaque catalog: entries are neither validated nor
//! generated locally.

use serde::{Deserialize, Serialize};

use crate::config::IN_TUNE_CENTS;
use crate::error::TunerError;
use crate::streaming::InboundPitchEvent;

/// A note the user can tune towards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetNote {
    /// Note name (e.g., "A", "C#")
    pub note: String,
    pub octave: i32,
    /// Frequency in Hz
    pub frequency: f64,
    /// Label shown to the user (e.g., "A4")
    pub display: String,
}

/// The set of target notes offered by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteCatalog {
    pub notes: Vec<TargetNote>,
}

impl NoteCatalog {
    /// Parses the body of the service's `/notes` endpoint.
    pub fn from_json(text: &str) -> Result<Self, TunerError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Looks a note up by its display label, ignoring ASCII case.
    pub fn find(&self, display: &str) -> Option<&TargetNote> {
        self.notes
            .iter()
            .find(|n| n.display.eq_ignore_ascii_case(display.trim()))
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// How far a detected pitch is from the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchDifference {
    /// Rounded deviation, positive when sharp.
    pub cents: i32,
    pub in_tune: bool,
}

impl PitchDifference {
    /// Compares an enriched event against `target` with the default tolerance.
    pub fn between(event: &InboundPitchEvent, target: &TargetNote) -> Option<Self> {
        Self::with_tolerance(event, target, IN_TUNE_CENTS)
    }

    /// Returns `None` when the event carries no pitch or either frequency is
    /// not positive.
    pub fn with_tolerance(event: &InboundPitchEvent, target: &TargetNote, tolerance: i32) -> Option<Self> {
        if event.pitch <= 0.0 || event.frequency <= 0.0 || target.frequency <= 0.0 {
            return None;
        }
        let cents = calculate_cents_deviation(event.frequency, target.frequency).round() as i32;
        Some(Self {
            cents,
            in_tune: cents.abs() <= tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{"notes":[
        {"note":"A","octave":4,"frequency":440.0,"display":"A4"},
        {"note":"C","octave":4,"frequency":261.63,"display":"C4"},
        {"note":"E","octave":2,"frequency":82.41,"display":"E2"}
    ]}"#;

    fn event(frequency: f64) -> InboundPitchEvent {
        InboundPitchEvent {
            pitch: frequency,
            note: "A".to_string(),
            octave: 4,
            cents: 0.0,
            frequency,
            timestamp: 0.0,
        }
    }

    fn a4() -> TargetNote {
        NoteCatalog::from_json(CATALOG).unwrap().find("A4").cloned().unwrap()
    }

    #[test]
    fn parses_catalog() {
        let catalog = NoteCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.notes.len(), 3);
        assert_eq!(catalog.find("e2").map(|n| n.octave), Some(2));
        assert!(catalog.find("B7").is_none());
    }

    #[test]
    fn rejects_malformed_catalog() {
        assert!(matches!(NoteCatalog::from_json("[]"), Err(TunerError::Catalog(_))));
        assert!(NoteCatalog::from_json(r#"{"notes":[{"note":"A"}]}"#).is_err());
    }

    #[test]
    fn cents_of_an_octave() {
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-9);
        assert!((calculate_cents_deviation(220.0, 440.0) + 1200.0).abs() < 1e-9);
    }

    #[test]
    fn in_tune_within_tolerance() {
        let target = a4();
        let diff = PitchDifference::between(&event(442.0), &target).unwrap();
        assert_eq!(diff.cents, 8);
        assert!(diff.in_tune);

        let diff = PitchDifference::between(&event(446.0), &target).unwrap();
        assert_eq!(diff.cents, 23);
        assert!(!diff.in_tune);

        let diff = PitchDifference::between(&event(430.0), &target).unwrap();
        assert_eq!(diff.cents, -40);
        assert!(!diff.in_tune);
    }

    #[test]
    fn no_difference_without_pitch() {
        let target = a4();
        assert_eq!(PitchDifference::between(&event(0.0), &target), None);

        let mut silent_target = target.clone();
        silent_target.frequency = 0.0;
        assert_eq!(PitchDifference::between(&event(440.0), &silent_target), None);
    }
}
