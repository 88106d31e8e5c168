//! Resolution policy
//!
//! Turns a confidence breakdown into RESOLVE / ESCALATE / ABORT. Rules are
//! evaluated in order and the first that applies wins:
//!
//! 1. critical file touched            -> ESCALATE (terminal)
//! 2. blast radius above 70%           -> ESCALATE (terminal)
//! 3. confidence >= 0.90, verified     -> RESOLVE
//! 4. confidence >= 0.85, verified     -> RESOLVE
//! 5. confidence >= 0.60, or the run produced a usable signal
//!                                     -> ESCALATE (retryable)
//! 6. otherwise                        -> ABORT
//!
//! `decide` is pure. The loop adds its own terminal rules for integrity
//! violations and incident timeouts.

use crate::blast_radius::BlastRadiusReport;
use crate::confidence::ConfidenceBreakdown;
use crate::model::VerificationResult;
use serde::{Deserialize, Serialize};

pub const HIGH_CONFIDENCE: f64 = 0.90;
pub const CONSERVATIVE_THRESHOLD: f64 = 0.85;
pub const ESCALATE_FLOOR: f64 = 0.60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Resolve,
    Escalate,
    Abort,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Resolve => "RESOLVE",
            DecisionKind::Escalate => "ESCALATE",
            DecisionKind::Abort => "ABORT",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    CriticalFileTouched,
    BlastRadiusExceeded,
    HighConfidence,
    ConservativeThreshold,
    BelowAutoResolve,
    ConfidenceTooLow,
    IntegrityViolation,
    IncidentTimeout,
}

impl DecisionRule {
    /// Only low-but-usable outcomes are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DecisionRule::BelowAutoResolve)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub rule: DecisionRule,
    pub confidence: f64,
    /// Attempt that produced this decision; `None` if the run ended before
    /// any attempt completed.
    pub attempt: Option<u32>,
    pub rationale: String,
}

impl Decision {
    pub fn integrity_violation(attempt: u32, confidence: f64, detail: &str) -> Self {
        Self {
            kind: DecisionKind::Abort,
            rule: DecisionRule::IntegrityViolation,
            confidence,
            attempt: Some(attempt),
            rationale: format!("integrity violation: {}", detail),
        }
    }

    pub fn incident_timeout(attempt: Option<u32>, confidence: f64, elapsed_ms: u64) -> Self {
        Self {
            kind: DecisionKind::Escalate,
            rule: DecisionRule::IncidentTimeout,
            confidence,
            attempt,
            rationale: format!("incident timeout after {}ms", elapsed_ms),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == DecisionKind::Escalate && self.rule.is_retryable()
    }
}

pub fn decide(
    breakdown: &ConfidenceBreakdown,
    blast: &BlastRadiusReport,
    verification: &VerificationResult,
    attempt: u32,
    max_attempts: u32,
) -> Decision {
    let confidence = breakdown.total;
    let make = |kind, rule, rationale: String| Decision {
        kind,
        rule,
        confidence,
        attempt: Some(attempt),
        rationale,
    };

    if blast.hard_block {
        let critical: Vec<&str> = blast
            .file_tiers
            .iter()
            .filter(|(_, tier)| tier.score() == 0.0)
            .map(|(path, _)| path.as_str())
            .collect();
        return make(
            DecisionKind::Escalate,
            DecisionRule::CriticalFileTouched,
            format!("critical file touched: {}", critical.join(", ")),
        );
    }

    if blast.exceeds_auto_radius() {
        return make(
            DecisionKind::Escalate,
            DecisionRule::BlastRadiusExceeded,
            format!(
                "blast radius exceeds 70% ({}/{} files)",
                blast.files_changed, blast.total_files
            ),
        );
    }

    if verification.success {
        if confidence >= HIGH_CONFIDENCE {
            return make(
                DecisionKind::Resolve,
                DecisionRule::HighConfidence,
                format!("high confidence ({:.3})", confidence),
            );
        }
        if confidence >= CONSERVATIVE_THRESHOLD {
            return make(
                DecisionKind::Resolve,
                DecisionRule::ConservativeThreshold,
                format!("conservative threshold met ({:.3})", confidence),
            );
        }
    }

    if confidence >= ESCALATE_FLOOR || verification.has_signal() {
        let mut rationale = if verification.success {
            format!("below auto-resolve threshold ({:.3})", confidence)
        } else {
            format!(
                "below auto-resolve threshold ({:.3}); verification did not pass",
                confidence
            )
        };
        if let Some(failure) = &verification.failure {
            rationale.push_str(&format!(" [{}]", failure.message));
        }
        if attempt >= max_attempts {
            rationale.push_str(&format!(
                "; exhausted attempts ({}/{})",
                attempt, max_attempts
            ));
        }
        return make(DecisionKind::Escalate, DecisionRule::BelowAutoResolve, rationale);
    }

    make(
        DecisionKind::Abort,
        DecisionRule::ConfidenceTooLow,
        format!(
            "confidence too low to act ({:.3}); verification could not run",
            confidence
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blast_radius::analyze;
    use crate::confidence::{score, ConfidenceBreakdown, Factor};
    use crate::error::{AttemptFailure, FailureKind};
    use crate::model::ChangeSet;

    fn inventory(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("src/f{i}.py")).collect()
    }

    fn verification(passed: u32, failed: u32, success: bool) -> VerificationResult {
        VerificationResult {
            passed,
            failed,
            total: passed + failed,
            output: String::new(),
            duration_ms: 1,
            success,
            executed: true,
            commands: Vec::new(),
            failure: None,
        }
    }

    fn breakdown_with_total(raw: f64) -> ConfidenceBreakdown {
        ConfidenceBreakdown::from_raw([
            (Factor::TestPassRatio, raw),
            (Factor::InverseBlastRadius, raw),
            (Factor::AttemptPenalty, raw),
            (Factor::RiskModifier, raw),
            (Factor::SelfConsistencyScore, raw),
        ])
    }

    #[test]
    fn resolves_high_confidence_single_file_fix() {
        let cs = ChangeSet::new().write("main.py", "fixed");
        let blast = analyze(&cs, &inventory(38));
        let v = verification(2, 0, true);
        let breakdown = score(&v, &blast, 1, blast.risk_modifier(), 1.0);
        let decision = decide(&breakdown, &blast, &v, 1, 3);
        assert_eq!(decision.kind, DecisionKind::Resolve);
        assert_eq!(decision.rule, DecisionRule::HighConfidence);
    }

    #[test]
    fn critical_file_escalates_regardless_of_score() {
        let cs = ChangeSet::new().write("db/migrations/0002_add_index.sql", "CREATE INDEX");
        let blast = analyze(&cs, &inventory(1000));
        let v = verification(50, 0, true);
        let decision = decide(&breakdown_with_total(1.0), &blast, &v, 1, 3);
        assert_eq!(decision.kind, DecisionKind::Escalate);
        assert_eq!(decision.rule, DecisionRule::CriticalFileTouched);
        assert!(decision.rationale.contains("critical file touched"));
        assert!(!decision.is_retryable());
    }

    #[test]
    fn wide_change_escalates() {
        let cs = ChangeSet::new()
            .write("a.py", "")
            .write("b.py", "")
            .write("c.py", "");
        let blast = analyze(&cs, &inventory(4));
        let decision = decide(&breakdown_with_total(1.0), &blast, &verification(1, 0, true), 1, 3);
        assert_eq!(decision.rule, DecisionRule::BlastRadiusExceeded);
        assert!(decision.rationale.contains("blast radius exceeds 70%"));
    }

    #[test]
    fn conservative_band_requires_passing_verification() {
        let blast = analyze(&ChangeSet::new().write("x.py", ""), &inventory(100));
        let breakdown = breakdown_with_total(0.87);
        assert!((breakdown.total - 0.87).abs() < 1e-9);

        let passed = decide(&breakdown, &blast, &verification(3, 0, true), 1, 3);
        assert_eq!(passed.kind, DecisionKind::Resolve);
        assert_eq!(passed.rule, DecisionRule::ConservativeThreshold);

        let failed = decide(&breakdown, &blast, &verification(3, 0, false), 1, 3);
        assert_eq!(failed.kind, DecisionKind::Escalate);
        assert_eq!(failed.rule, DecisionRule::BelowAutoResolve);
        assert!(failed.is_retryable());
    }

    #[test]
    fn unverified_high_confidence_never_resolves() {
        let blast = analyze(&ChangeSet::new().write("x.py", ""), &inventory(100));
        let decision = decide(&breakdown_with_total(0.95), &blast, &verification(4, 0, false), 1, 3);
        assert_eq!(decision.kind, DecisionKind::Escalate);
    }

    #[test]
    fn failing_tests_on_last_attempt_cite_exhaustion() {
        let cs = ChangeSet::new().write("src/calc.py", "broken");
        let blast = analyze(&cs, &inventory(38));
        let v = verification(0, 2, false);
        let breakdown = score(&v, &blast, 3, blast.risk_modifier(), 0.8);
        assert!(breakdown.total < ESCALATE_FLOOR);
        let decision = decide(&breakdown, &blast, &v, 3, 3);
        assert_eq!(decision.kind, DecisionKind::Escalate);
        assert!(decision.rationale.contains("exhausted attempts (3/3)"));
    }

    #[test]
    fn attempt_local_failure_is_a_signal() {
        let blast = analyze(&ChangeSet::new(), &inventory(10));
        let v = VerificationResult::unusable(AttemptFailure::new(
            FailureKind::ProposalFailure,
            "malformed proposal: missing content",
        ));
        let decision = decide(&breakdown_with_total(0.2), &blast, &v, 1, 3);
        assert_eq!(decision.kind, DecisionKind::Escalate);
        assert!(decision.is_retryable());
        assert!(decision.rationale.contains("malformed proposal"));
    }

    #[test]
    fn nothing_verifiable_aborts() {
        let blast = analyze(&ChangeSet::new().write("x.py", ""), &inventory(10));
        let mut v = verification(0, 0, false);
        v.executed = false;
        let decision = decide(&breakdown_with_total(0.3), &blast, &v, 1, 3);
        assert_eq!(decision.kind, DecisionKind::Abort);
        assert_eq!(decision.rule, DecisionRule::ConfidenceTooLow);
        assert!(decision.rationale.contains("confidence too low to act"));
    }
}
