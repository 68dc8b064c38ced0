use serde::{Deserialize, Serialize};

use crate::pitch::PitchEstimate;

/// Messages sent to the note-mapping service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    AudioData {
        frequency: f32,
        amplitude: f32,
        timestamp: f64,
    },
    Ping,
}

impl From<&PitchEstimate> for OutboundMessage {
    fn from(estimate: &PitchEstimate) -> Self {
        OutboundMessage::AudioData {
            frequency: estimate.frequency,
            amplitude: estimate.amplitude,
            timestamp: estimate.timestamp,
        }
    }
}

impl OutboundMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A detected pitch enriched by the service with note, octave and cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundPitchEvent {
    pub pitch: f64,
    pub note: String,
    pub octave: i32,
    pub cents: f64,
    pub frequency: f64,
    pub timestamp: f64,
}

impl InboundPitchEvent {
    /// Note name with octave, e.g. `"A4"`.
    pub fn label(&self) -> String {
        format!("{}{}", self.note, self.octave)
    }
}

/// Messages received from the note-mapping service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    PitchData(InboundPitchEvent),
    Pong,
    #[serde(other)]
    Other,
}

impl InboundMessage {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn audio_data_wire_shape() {
        let estimate = PitchEstimate { frequency: 440.0, amplitude: 0.25, timestamp: 1_700_000_000.5 };
        let text = OutboundMessage::from(&estimate).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "audio_data", "frequency": 440.0, "amplitude": 0.25, "timestamp": 1_700_000_000.5})
        );
    }

    #[test]
    fn ping_wire_shape() {
        assert_eq!(OutboundMessage::Ping.encode().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn decodes_pitch_data() {
        let text = r#"{"type":"pitch_data","pitch":440.0,"note":"A","octave":4,"cents":0,
                       "frequency":440.0,"timestamp":1700000000.25}"#;
        let InboundMessage::PitchData(event) = InboundMessage::decode(text).unwrap() else {
            panic!("expected pitch data");
        };
        assert_eq!(event.label(), "A4");
        assert_eq!(event.cents, 0.0);
        assert_eq!(event.timestamp, 1_700_000_000.25);
    }

    #[test]
    fn unknown_types_are_other() {
        assert_eq!(InboundMessage::decode(r#"{"type":"status","ok":true}"#).unwrap(), InboundMessage::Other);
        assert_eq!(InboundMessage::decode(r#"{"type":"pong"}"#).unwrap(), InboundMessage::Pong);
    }

    #[test]
    fn malformed_payloads_fail() {
        assert!(InboundMessage::decode("not json").is_err());
        assert!(InboundMessage::decode(r#"{"pitch":440.0}"#).is_err());
        assert!(InboundMessage::decode(r#"{"type":"pitch_data","pitch":"high"}"#).is_err());
    }
}
