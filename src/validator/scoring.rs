//! Weighted quality score from execution signals.

use serde::{Deserialize, Serialize};

pub const WEIGHT_TESTS: f64 = 0.40;
pub const WEIGHT_AGREEMENT: f64 = 0.30;
pub const WEIGHT_DOCS: f64 = 0.10;
pub const WEIGHT_PERFORMANCE: f64 = 0.10;
pub const WEIGHT_PENALTIES: f64 = -0.25;

/// Normalized quality signals for one job. Fractions are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub tests_passed: bool,
    pub test_score: f64,
    pub coverage: f64,
    pub docs_quality: f64,
    pub performance_ok: bool,
    pub cross_model_agreement: f64,
}

impl Signals {
    /// Conservative defaults. Without a result artifact there is nothing to
    /// credit for tests.
    pub fn baseline(has_result: bool) -> Self {
        Self {
            tests_passed: true,
            test_score: if has_result { 0.9 } else { 0.0 },
            coverage: 0.8,
            docs_quality: 0.8,
            performance_ok: true,
            cross_model_agreement: 0.5,
        }
    }

    /// Replace any signal present in `overrides` (an artifact's `signals`
    /// object). Unknown keys and mistyped values are ignored.
    pub fn apply(&mut self, overrides: &serde_json::Value) {
        let Some(map) = overrides.as_object() else {
            return;
        };
        let num = |k: &str| map.get(k).and_then(|v| v.as_f64());
        let flag = |k: &str| map.get(k).and_then(|v| v.as_bool());

        if let Some(v) = flag("tests_passed") {
            self.tests_passed = v;
        }
        if let Some(v) = num("test_score") {
            self.test_score = v;
        }
        if let Some(v) = num("coverage") {
            self.coverage = v;
        }
        if let Some(v) = num("docs_quality") {
            self.docs_quality = v;
        }
        if let Some(v) = flag("performance_ok") {
            self.performance_ok = v;
        }
        if let Some(v) = num("cross_model_agreement") {
            self.cross_model_agreement = v;
        }
    }
}

/// Weighted sum of the signals minus `penalties`, clamped to `[0, 1]`.
pub fn score_from_signals(signals: &Signals, penalties: f64) -> f64 {
    let performance = if signals.performance_ok { 1.0 } else { 0.0 };
    let raw = signals.test_score * WEIGHT_TESTS
        + signals.cross_model_agreement * WEIGHT_AGREEMENT
        + signals.docs_quality * WEIGHT_DOCS
        + performance * WEIGHT_PERFORMANCE
        + penalties * WEIGHT_PENALTIES;
    // max/min rather than clamp so a NaN input lands on 0.
    raw.max(0.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(v: f64, flag: bool) -> Signals {
        Signals {
            tests_passed: flag,
            test_score: v,
            coverage: v,
            docs_quality: v,
            performance_ok: flag,
            cross_model_agreement: v,
        }
    }

    #[test]
    fn all_zero_and_all_one_are_bounded() {
        assert_eq!(score_from_signals(&uniform(0.0, false), 0.0), 0.0);
        assert!((score_from_signals(&uniform(1.0, true), 0.0) - 0.9).abs() < 1e-9);
        assert_eq!(score_from_signals(&uniform(1.0, true), 10.0), 0.0);
        assert_eq!(score_from_signals(&uniform(0.0, false), -10.0), 1.0);
    }

    #[test]
    fn out_of_range_inputs_stay_bounded() {
        for v in [-5.0, 0.25, 3.0, f64::NAN, f64::INFINITY] {
            for p in [0.0, 1.0, 4.0] {
                let s = score_from_signals(&uniform(v, true), p);
                assert!((0.0..=1.0).contains(&s), "{v} {p} -> {s}");
            }
        }
    }

    #[test]
    fn baseline_with_result() {
        let s = score_from_signals(&Signals::baseline(true), 0.0);
        // 0.9*0.4 + 0.5*0.3 + 0.8*0.1 + 0.1
        assert!((s - 0.69).abs() < 1e-9);
        let penalized = score_from_signals(&Signals::baseline(true), 1.0);
        assert!((penalized - 0.44).abs() < 1e-9);
    }

    #[test]
    fn baseline_without_result() {
        let s = score_from_signals(&Signals::baseline(false), 0.0);
        assert!((s - 0.33).abs() < 1e-9);
    }

    #[test]
    fn overrides_replace_known_signals() {
        let mut s = Signals::baseline(false);
        s.apply(&serde_json::json!({"test_score": 1.0, "performance_ok": false, "bogus": 3, "coverage": "high"}));
        assert_eq!(s.test_score, 1.0);
        assert!(!s.performance_ok);
        assert_eq!(s.coverage, 0.8);
    }
}
