//! Severity classification and the action each severity maps to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::governance::scorer::{Penalty, ScoreResult};

/// Governance severity of a completed job's problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    /// Only raised by external callers such as the watchdog.
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// What governance does about a severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "penalty_-1")]
    MinorPenalty,
    #[serde(rename = "penalty_-5")]
    MajorPenalty,
    #[serde(rename = "warn_or_suspend")]
    WarnOrSuspend,
}

impl Action {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::WarnOrSuspend,
            Severity::High => Self::MajorPenalty,
            Severity::Medium => Self::MinorPenalty,
            Severity::Low => Self::None,
        }
    }
}

/// Classify a scoring outcome.
pub fn classify(result: &ScoreResult) -> Severity {
    let penalties = &result.penalties;
    if result.warning {
        Severity::Critical
    } else if penalties.contains(&Penalty::LowConfidence) || penalties.contains(&Penalty::TooShort)
    {
        if penalties.len() > 1 {
            Severity::Medium
        } else {
            Severity::Low
        }
    } else if !penalties.is_empty() {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(penalties: Vec<Penalty>, warning: bool) -> ScoreResult {
        ScoreResult {
            score: 0.0,
            penalties,
            confidence: 0.0,
            warning,
        }
    }

    #[test]
    fn warning_is_always_critical() {
        let r = result(vec![Penalty::EmptyOutput], true);
        assert_eq!(classify(&r), Severity::Critical);
        assert_eq!(Action::for_severity(classify(&r)), Action::WarnOrSuspend);
    }

    #[test]
    fn single_soft_penalty_is_low() {
        assert_eq!(classify(&result(vec![Penalty::TooShort], false)), Severity::Low);
        assert_eq!(
            classify(&result(vec![Penalty::LowConfidence], false)),
            Severity::Low
        );
    }

    #[test]
    fn combined_soft_penalties_are_medium() {
        let r = result(vec![Penalty::LowConfidence, Penalty::TooShort], false);
        assert_eq!(classify(&r), Severity::Medium);
        assert_eq!(Action::for_severity(Severity::Medium), Action::MinorPenalty);
    }

    #[test]
    fn other_penalties_without_warning_are_medium() {
        let r = result(vec![Penalty::ModelDrift], false);
        assert_eq!(classify(&r), Severity::Medium);
    }

    #[test]
    fn clean_result_is_low_with_no_action() {
        let r = result(Vec::new(), false);
        assert_eq!(classify(&r), Severity::Low);
        assert_eq!(Action::for_severity(Severity::Low), Action::None);
    }

    #[test]
    fn action_wire_names() {
        assert_eq!(
            serde_json::to_string(&Action::WarnOrSuspend).unwrap(),
            "\"warn_or_suspend\""
        );
        assert_eq!(
            serde_json::to_string(&Action::MajorPenalty).unwrap(),
            "\"penalty_-5\""
        );
        assert_eq!(Action::for_severity(Severity::High), Action::MajorPenalty);
    }
}
