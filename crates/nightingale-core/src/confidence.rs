//! Confidence scoring
//!
//! Five factors, each a raw score in [0,1] with a fixed weight:
//!
//! | factor                 | weight |
//! |------------------------|--------|
//! | test_pass_ratio        | 0.35   |
//! | inverse_blast_radius   | 0.25   |
//! | attempt_penalty        | 0.15   |
//! | risk_modifier          | 0.15   |
//! | self_consistency_score | 0.10   |
//!
//! The breakdown is kept verbatim on every attempt for audit.

use crate::blast_radius::BlastRadiusReport;
use crate::model::VerificationResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    TestPassRatio,
    InverseBlastRadius,
    AttemptPenalty,
    RiskModifier,
    SelfConsistencyScore,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::TestPassRatio,
        Factor::InverseBlastRadius,
        Factor::AttemptPenalty,
        Factor::RiskModifier,
        Factor::SelfConsistencyScore,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            Factor::TestPassRatio => 0.35,
            Factor::InverseBlastRadius => 0.25,
            Factor::AttemptPenalty => 0.15,
            Factor::RiskModifier => 0.15,
            Factor::SelfConsistencyScore => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::TestPassRatio => "test_pass_ratio",
            Factor::InverseBlastRadius => "inverse_blast_radius",
            Factor::AttemptPenalty => "attempt_penalty",
            Factor::RiskModifier => "risk_modifier",
            Factor::SelfConsistencyScore => "self_consistency_score",
        }
    }
}

/// Sum of all factor weights; the scorer relies on this being 1.0.
pub fn weight_sum() -> f64 {
    Factor::ALL.iter().map(Factor::weight).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub factor: Factor,
    pub raw: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub factors: Vec<FactorScore>,
    pub total: f64,
}

impl ConfidenceBreakdown {
    pub fn from_raw(raw: [(Factor, f64); 5]) -> Self {
        let factors: Vec<FactorScore> = raw
            .into_iter()
            .map(|(factor, value)| {
                let raw = unit(value);
                FactorScore {
                    factor,
                    raw,
                    weight: factor.weight(),
                    contribution: raw * factor.weight(),
                }
            })
            .collect();
        let total = unit(factors.iter().map(|f| f.contribution).sum());
        Self { factors, total }
    }

    pub fn get(&self, factor: Factor) -> Option<&FactorScore> {
        self.factors.iter().find(|f| f.factor == factor)
    }

    pub fn raw(&self, factor: Factor) -> f64 {
        self.get(factor).map(|f| f.raw).unwrap_or(0.0)
    }
}

/// Clamp into [0,1]; NaN counts as no evidence.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn test_pass_ratio(verification: &VerificationResult) -> f64 {
    if verification.total > 0 {
        verification.passed as f64 / verification.total as f64
    } else if verification.executed && verification.success {
        // no test-bearing commands, but everything exited cleanly
        1.0
    } else {
        0.0
    }
}

/// Penalty from attempt 4 onwards.
pub const LATE_ATTEMPT_PENALTY: f64 = 0.3;

/// 1.0, 0.7, 0.4 for attempts 1-3, then a flat [`LATE_ATTEMPT_PENALTY`].
pub fn attempt_penalty(attempt: u32) -> f64 {
    match attempt {
        0 | 1 => 1.0,
        2 => 0.7,
        3 => 0.4,
        _ => LATE_ATTEMPT_PENALTY,
    }
}

pub fn score(
    verification: &VerificationResult,
    blast: &BlastRadiusReport,
    attempt: u32,
    risk_modifier: f64,
    self_consistency: f64,
) -> ConfidenceBreakdown {
    ConfidenceBreakdown::from_raw([
        (Factor::TestPassRatio, test_pass_ratio(verification)),
        (Factor::InverseBlastRadius, blast.inverse_radius()),
        (Factor::AttemptPenalty, attempt_penalty(attempt)),
        (Factor::RiskModifier, risk_modifier),
        (Factor::SelfConsistencyScore, self_consistency),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blast_radius::analyze;
    use crate::model::ChangeSet;

    fn verification(passed: u32, failed: u32, success: bool) -> VerificationResult {
        VerificationResult {
            passed,
            failed,
            total: passed + failed,
            output: String::new(),
            duration_ms: 10,
            success,
            executed: true,
            commands: Vec::new(),
            failure: None,
        }
    }

    #[test]
    fn weights_sum_to_one() {
        assert!((weight_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn attempt_penalty_table() {
        assert_eq!(attempt_penalty(1), 1.0);
        assert!((attempt_penalty(2) - 0.7).abs() < 1e-12);
        assert!((attempt_penalty(3) - 0.4).abs() < 1e-12);
        assert_eq!(attempt_penalty(4), LATE_ATTEMPT_PENALTY);
        assert_eq!(attempt_penalty(10), LATE_ATTEMPT_PENALTY);
        assert_eq!(attempt_penalty(0), 1.0);
    }

    #[test]
    fn pass_ratio_without_tests_uses_exit_status() {
        let mut clean = verification(0, 0, true);
        assert_eq!(test_pass_ratio(&clean), 1.0);
        clean.executed = false;
        assert_eq!(test_pass_ratio(&clean), 0.0);
        assert_eq!(test_pass_ratio(&verification(0, 0, false)), 0.0);
        assert_eq!(test_pass_ratio(&verification(3, 1, false)), 0.75);
    }

    #[test]
    fn single_file_fix_on_first_attempt_scores_above_ninety() {
        let inventory: Vec<String> = (0..38).map(|i| format!("f{i}.py")).collect();
        let cs = ChangeSet::new().write("main.py", "def subtract(a, b):\n    return a - b\n");
        let blast = analyze(&cs, &inventory);
        let breakdown = score(&verification(2, 0, true), &blast, 1, blast.risk_modifier(), 1.0);
        assert!((breakdown.total - 0.9034).abs() < 1e-3, "total = {}", breakdown.total);
        assert_eq!(breakdown.factors.len(), 5);
        assert!((breakdown.raw(Factor::RiskModifier) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let blast = analyze(&ChangeSet::new(), &["a"]);
        let breakdown = score(&verification(1, 0, true), &blast, 1, 7.0, f64::NAN);
        assert_eq!(breakdown.raw(Factor::RiskModifier), 1.0);
        assert_eq!(breakdown.raw(Factor::SelfConsistencyScore), 0.0);
        assert!(breakdown.total <= 1.0);
    }

    #[test]
    fn contributions_add_up_to_total() {
        let blast = analyze(&ChangeSet::new().write("utils/x.py", ""), &["a", "b", "c", "d"]);
        let breakdown = score(&verification(1, 1, false), &blast, 2, 0.7, 0.5);
        let sum: f64 = breakdown.factors.iter().map(|f| f.contribution).sum();
        assert!((sum - breakdown.total).abs() < 1e-12);
    }
}
