//! Terminal rendering of tuner readings.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tuner_core::FrameAnalysis;
use tuner_core::streaming::InboundPitchEvent;
use tuner_core::tuning::{PitchDifference, TargetNote};

/// Width of the level bar in characters.
const BAR_WIDTH: usize = 20;

/// Minimum time between two redraws of the status line.
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Renders a level percentage as a fixed-width bar.
pub fn level_bar(level_percent: f32, width: usize) -> String {
    let filled = ((level_percent.clamp(0.0, 100.0) / 100.0) * width as f32).round() as usize;
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// Signed cents with an in-tune marker, e.g. `+3 cents (in tune)`.
pub fn format_difference(difference: &PitchDifference) -> String {
    let verdict = if difference.in_tune {
        "in tune"
    } else if difference.cents > 0 {
        "sharp"
    } else {
        "flat"
    };
    format!("{:+} cents ({verdict})", difference.cents)
}

/// One status line from the latest local analysis and service event.
pub fn status_line(
    analysis: Option<&FrameAnalysis>,
    event: Option<&InboundPitchEvent>,
    target: Option<&TargetNote>,
    tolerance: i32,
    connected: bool,
) -> String {
    let level = analysis.map_or(0.0, |a| a.loudness.level_percent);
    let mut line = format!("{} {:>3.0}%", level_bar(level, BAR_WIDTH), level);

    match analysis.and_then(|a| a.estimate.as_ref()) {
        Some(estimate) => line.push_str(&format!("  {:>7.1} Hz", estimate.frequency)),
        None => line.push_str("        -- Hz"),
    }

    if let Some(event) = event {
        line.push_str(&format!("  {:<4}", event.label()));
        if let Some(target) = target {
            match PitchDifference::with_tolerance(event, target, tolerance) {
                Some(difference) => {
                    line.push_str(&format!("  {}", format_difference(&difference)));
                }
                None => line.push_str("  --"),
            }
        }
    }

    if let Some(target) = target {
        line.push_str(&format!("  target {}", target.display));
    }
    if !connected {
        line.push_str("  [offline]");
    }
    line
}

/// Redraws the status line in place, at most every [`REDRAW_INTERVAL`].
pub struct StatusPrinter {
    target: Option<TargetNote>,
    tolerance: i32,
    analysis: Option<FrameAnalysis>,
    event: Option<InboundPitchEvent>,
    last_draw: Option<Instant>,
}

impl StatusPrinter {
    pub fn new(target: Option<TargetNote>, tolerance: i32) -> Self {
        Self {
            target,
            tolerance,
            analysis: None,
            event: None,
            last_draw: None,
        }
    }

    pub fn analysis(&mut self, analysis: FrameAnalysis) {
        self.analysis = Some(analysis);
    }

    pub fn event(&mut self, event: InboundPitchEvent) {
        self.event = Some(event);
    }

    pub fn draw(&mut self, connected: bool) -> io::Result<()> {
        if self.last_draw.is_some_and(|t| t.elapsed() < REDRAW_INTERVAL) {
            return Ok(());
        }
        self.last_draw = Some(Instant::now());

        let line = status_line(
            self.analysis.as_ref(),
            self.event.as_ref(),
            self.target.as_ref(),
            self.tolerance,
            connected,
        );
        let mut out = io::stdout().lock();
        write!(out, "\r{line:<100}")?;
        out.flush()
    }

    /// Moves past the status line so later output starts on a fresh line.
    pub fn finish(&self) -> io::Result<()> {
        if self.last_draw.is_some() {
            writeln!(io::stdout())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::{LoudnessSample, PitchEstimate};

    fn analysis(level_percent: f32, frequency: Option<f32>) -> FrameAnalysis {
        FrameAnalysis {
            loudness: LoudnessSample { rms: level_percent / 200.0, level_percent },
            active: frequency.is_some(),
            frequency: frequency.unwrap_or(-1.0),
            estimate: frequency.map(|frequency| PitchEstimate { frequency, amplitude: 0.1, timestamp: 0.0 }),
        }
    }

    fn a4() -> TargetNote {
        TargetNote {
            note: "A".to_string(),
            octave: 4,
            frequency: 440.0,
            display: "A4".to_string(),
        }
    }

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

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(level_bar(0.0, 4), "[....]");
        assert_eq!(level_bar(50.0, 4), "[##..]");
        assert_eq!(level_bar(100.0, 4), "[####]");
        assert_eq!(level_bar(250.0, 4), "[####]");
    }

    #[test]
    fn difference_verdicts() {
        assert_eq!(format_difference(&PitchDifference { cents: 3, in_tune: true }), "+3 cents (in tune)");
        assert_eq!(format_difference(&PitchDifference { cents: 25, in_tune: false }), "+25 cents (sharp)");
        assert_eq!(format_difference(&PitchDifference { cents: -40, in_tune: false }), "-40 cents (flat)");
    }

    #[test]
    fn silent_line_has_no_frequency() {
        let line = status_line(Some(&analysis(0.0, None)), None, None, 10, true);
        assert!(line.contains("-- Hz"));
        assert!(line.contains("0%"));
        assert!(!line.contains("offline"));
    }

    #[test]
    fn line_shows_note_and_target() {
        let target = a4();
        let line = status_line(
            Some(&analysis(42.0, Some(441.0))),
            Some(&event(441.0)),
            Some(&target),
            10,
            false,
        );
        assert!(line.contains("441.0 Hz"));
        assert!(line.contains("A4"));
        assert!(line.contains("+4 cents (in tune)"));
        assert!(line.contains("target A4"));
        assert!(line.contains("[offline]"));
    }
}
