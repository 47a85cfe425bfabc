//! The 5-tuple classification attached to every inbound message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational stance inferred from the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Execute,
    Assist,
    Analyze,
    Build,
    Maintain,
}

/// Speech-act of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Direct,
    Inform,
    Commit,
    Decide,
    Express,
}

/// The 5-tuple classification plus weight (§3 of the runtime spec).
///
/// `weight` is informational density in `[0.0, 1.0]`, used to filter noise
/// before it reaches the LLM. `kind` and `format` are free-form strings
/// rather than closed enums — the classifier's keyword tables grow new
/// values without a schema migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub mode: Mode,
    pub genre: Genre,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub weight: f32,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Clamp `weight` to `[0.0, 1.0]` — the invariant the spec requires.
    pub fn clamp_weight(&mut self) {
        self.weight = self.weight.clamp(0.0, 1.0);
    }

    pub fn is_below_threshold(&self, threshold: f32) -> bool {
        self.weight < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_weight_caps_above_one() {
        let mut s = Signal {
            mode: Mode::Assist,
            genre: Genre::Inform,
            kind: "question".into(),
            format: "message".into(),
            weight: 1.5,
            channel: "cli".into(),
            timestamp: Utc::now(),
        };
        s.clamp_weight();
        assert_eq!(s.weight, 1.0);
    }

    #[test]
    fn clamp_weight_floors_below_zero() {
        let mut s = Signal {
            mode: Mode::Assist,
            genre: Genre::Inform,
            kind: "question".into(),
            format: "message".into(),
            weight: -0.3,
            channel: "cli".into(),
            timestamp: Utc::now(),
        };
        s.clamp_weight();
        assert_eq!(s.weight, 0.0);
    }

    #[test]
    fn below_threshold_is_exclusive_on_equality() {
        let s = Signal {
            mode: Mode::Assist,
            genre: Genre::Inform,
            kind: "question".into(),
            format: "message".into(),
            weight: 0.6,
            channel: "cli".into(),
            timestamp: Utc::now(),
        };
        assert!(!s.is_below_threshold(0.6));
        assert!(s.is_below_threshold(0.61));
    }
}
