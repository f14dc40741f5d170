//! Heuristic output scorer.
//!
//! A pure function of (output, confidence, minimum length). Penalties are
//! reported in the order the checks run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Minimum output length used when the task does not specify one.
pub const DEFAULT_MIN_LENGTH: usize = 20;

const LOW_CONFIDENCE: f64 = 0.5;
const PENALTY_POINTS: f64 = 15.0;
const WARNING_POINTS: f64 = 50.0;

/// Phrases suggesting the model abandoned its instructions.
const DRIFT_KEYWORDS: &[&str] = &[
    "completely rewrite",
    "ignore previous",
    "change direction",
    "different approach",
    "alternative plan",
];

/// Phrases that excuse a drift phrase.
const JUSTIFICATION_KEYWORDS: &[&str] = &[
    "director approved",
    "per instruction",
    "as requested",
    "enhancement suggestion",
    "reasoning:",
];

/// A scoring rule that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    LowConfidence,
    EmptyOutput,
    ModelDrift,
    TooShort,
}

impl Penalty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::EmptyOutput => "empty_output",
            Self::ModelDrift => "model_drift",
            Self::TooShort => "too_short",
        }
    }
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Penalty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_confidence" => Ok(Self::LowConfidence),
            "empty_output" => Ok(Self::EmptyOutput),
            "model_drift" => Ok(Self::ModelDrift),
            "too_short" => Ok(Self::TooShort),
            other => Err(format!("unknown penalty: {other}")),
        }
    }
}

/// Outcome of scoring one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub penalties: Vec<Penalty>,
    pub confidence: f64,
    /// Set by rules that count toward the two-strike limit.
    pub warning: bool,
}

/// Score an output.
///
/// Base score is `confidence * 100`; each penalty subtracts 15 and a warning
/// subtracts a further 50. The result never drops below zero.
pub fn score(output: &str, confidence: f64, min_length: usize) -> ScoreResult {
    let mut penalties = Vec::new();
    let mut warning = false;

    if confidence < LOW_CONFIDENCE {
        penalties.push(Penalty::LowConfidence);
    }

    if output.trim().is_empty() {
        penalties.push(Penalty::EmptyOutput);
        warning = true;
    }

    let lower = output.to_lowercase();
    let drift = DRIFT_KEYWORDS.iter().any(|k| lower.contains(k));
    let justified = JUSTIFICATION_KEYWORDS.iter().any(|k| lower.contains(k));
    if drift && !justified {
        penalties.push(Penalty::ModelDrift);
        warning = true;
    }

    let len = output.chars().count();
    if len > 0 && len < min_length {
        penalties.push(Penalty::TooShort);
    }

    let mut deductions = penalties.len() as f64 * PENALTY_POINTS;
    if warning {
        deductions += WARNING_POINTS;
    }

    ScoreResult {
        score: (confidence * 100.0 - deductions).max(0.0),
        penalties,
        confidence,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_low_confidence_output_is_zeroed() {
        let result = score("", 0.3, DEFAULT_MIN_LENGTH);
        assert_eq!(
            result.penalties,
            vec![Penalty::LowConfidence, Penalty::EmptyOutput]
        );
        assert!(result.warning);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn adequate_output_is_clean() {
        let result = score(
            "a perfectly adequate forty-character response here",
            0.9,
            20,
        );
        assert!(result.penalties.is_empty());
        assert!(!result.warning);
        assert!((result.score - 90.0).abs() < 1e-9);
    }

    #[test]
    fn whitespace_only_is_empty_and_short() {
        // Emptiness is judged on trimmed text, length on the raw text.
        let result = score("   ", 0.9, 20);
        assert_eq!(result.penalties, vec![Penalty::EmptyOutput, Penalty::TooShort]);
        assert!(result.warning);
        // 90 - 30 - 50
        assert!((result.score - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unjustified_drift_warns() {
        let result = score(
            "We should Completely Rewrite the module from scratch.",
            1.0,
            20,
        );
        assert_eq!(result.penalties, vec![Penalty::ModelDrift]);
        assert!(result.warning);
        assert!((result.score - 35.0).abs() < 1e-9);
    }

    #[test]
    fn justified_drift_is_accepted() {
        let result = score(
            "Director approved: completely rewrite the parser for speed.",
            1.0,
            20,
        );
        assert!(result.penalties.is_empty());
        assert!(!result.warning);
    }

    #[test]
    fn short_output_is_penalised_without_warning() {
        let result = score("ok", 0.8, 20);
        assert_eq!(result.penalties, vec![Penalty::TooShort]);
        assert!(!result.warning);
        assert!((result.score - 65.0).abs() < 1e-9);
    }

    #[test]
    fn length_counts_characters() {
        // Five characters, fifteen bytes.
        let result = score("ééééé", 0.9, 5);
        assert!(result.penalties.is_empty());
    }

    #[test]
    fn scoring_is_deterministic() {
        let a = score("ignore previous notes", 0.4, 30);
        let b = score("ignore previous notes", 0.4, 30);
        assert_eq!(a, b);
    }

    #[test]
    fn penalty_names_round_trip_through_display() {
        for p in [
            Penalty::LowConfidence,
            Penalty::EmptyOutput,
            Penalty::ModelDrift,
            Penalty::TooShort,
        ] {
            assert_eq!(p.to_string().parse::<Penalty>().unwrap(), p);
        }
    }
}
