//! Reflective attempt loop
//!
//! Drives one incident through up to `max_attempts` propose -> sandbox ->
//! verify -> score -> decide cycles. Each attempt's request is built fresh;
//! the only thing carried forward is the previous attempt's feedback.

use crate::sandbox::{Sandbox, SandboxOptions};
use chrono::Utc;
use nightingale_adapters::util::tail_chars;
use nightingale_adapters::workflow::discover_verification_commands;
use nightingale_adapters::{NightingaleConfig, RepoInventory};
use nightingale_core::{
    analyze, decide, score, Attempt, AttemptFailure, AttemptFeedback, ChangeSet, Decision,
    FixProposer, Incident, IncidentResult, Proposal, ProposalFailure,
    ProposalRequest, RepairError, VerificationCommand, VerificationResult, DEFAULT_MAX_ATTEMPTS,
};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Characters of failing output handed back to the proposer.
const FEEDBACK_TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_attempts: u32,
    pub command_timeout: Duration,
    pub incident_timeout: Duration,
    pub sandbox: SandboxOptions,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            command_timeout: Duration::from_secs(60),
            incident_timeout: Duration::from_secs(15 * 60),
            sandbox: SandboxOptions::default(),
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &NightingaleConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            command_timeout: config.command_timeout(),
            incident_timeout: config.incident_timeout(),
            sandbox: SandboxOptions::from_config(config),
        }
    }
}

/// What the loop learns about the repository once per incident.
#[derive(Debug, Default)]
struct RepoFacts {
    inventory: Vec<String>,
    discovered: Vec<String>,
}

/// Resources owned by one trial. Lives outside the deadline-bounded future so
/// teardown still happens when that future is dropped.
#[derive(Default)]
struct TrialState {
    /// Copy still in progress when the trial future was dropped.
    preparing: Option<JoinHandle<Result<Sandbox, RepairError>>>,
    sandbox: Option<Sandbox>,
    proposal: Option<Proposal>,
    proposer_failure: Option<ProposalFailure>,
}

impl TrialState {
    /// Wait for an interrupted `prepare` so its sandbox is torn down and the
    /// source re-fingerprinted like any other.
    async fn settle(&mut self) {
        let Some(preparing) = self.preparing.take() else {
            return;
        };
        match preparing.await {
            Ok(Ok(sandbox)) => self.sandbox = Some(sandbox),
            Ok(Err(err)) => tracing::debug!("interrupted sandbox never came up: {}", err),
            Err(join) => tracing::warn!("interrupted sandbox preparation panicked: {}", join),
        }
    }
}

pub struct RepairLoop {
    settings: LoopSettings,
}

impl RepairLoop {
    pub fn new(settings: LoopSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run the incident to a terminal decision. Never fails: every error ends
    /// up in an attempt record or in the decision rationale.
    pub async fn run(&self, incident: &Incident, proposer: &dyn FixProposer) -> IncidentResult {
        let span = tracing::info_span!("incident", incident = %incident.id);
        self.run_incident(incident, proposer).instrument(span).await
    }

    async fn run_incident(&self, incident: &Incident, proposer: &dyn FixProposer) -> IncidentResult {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.incident_timeout;
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts: Vec<Attempt> = Vec::new();

        tracing::info!(
            proposer = proposer.name(),
            max_attempts,
            category = %incident.category,
            "repair started"
        );

        let facts = match tokio::time::timeout_at(deadline, self.survey(incident)).await {
            Ok(facts) => facts,
            Err(_) => return self.timed_out(incident, attempts, started),
        };

        let mut feedback: Option<AttemptFeedback> = None;
        for number in 1..=max_attempts {
            if tokio::time::Instant::now() >= deadline {
                return self.timed_out(incident, attempts, started);
            }

            let request = ProposalRequest {
                incident,
                attempt: number,
                max_attempts,
                feedback: feedback.take(),
            };
            let attempt_span = tracing::info_span!("attempt", attempt = number);
            let started_at = Utc::now();
            let attempt_clock = Instant::now();

            let mut state = TrialState::default();
            let trial = self
                .trial(incident, proposer, &request, &facts, &mut state)
                .instrument(attempt_span.clone());
            let (mut verification, deadline_hit) =
                match tokio::time::timeout_at(deadline, trial).await {
                    Ok(verification) => (verification, false),
                    Err(_) => {
                        let err = RepairError::IncidentTimeout {
                            elapsed_ms: elapsed_ms(started),
                        };
                        (VerificationResult::unusable(AttemptFailure::from(&err)), true)
                    }
                };

            state.settle().await;
            let integrity = match state.sandbox.take() {
                Some(sandbox) => match teardown(sandbox).await {
                    Err(err) if err.is_fatal() => Some(err),
                    Err(err) => {
                        let _entered = attempt_span.enter();
                        tracing::warn!("sandbox cleanup failed: {}", err);
                        verification
                            .output
                            .push_str(&format!("\n[sandbox cleanup failed: {}]", err));
                        None
                    }
                    Ok(()) => None,
                },
                None => None,
            };

            let exhausted = matches!(state.proposer_failure, Some(ProposalFailure::Exhausted));
            let (change_set, rationale, self_consistency) = match state.proposal.take() {
                Some(proposal) => (
                    proposal.change_set,
                    proposal.rationale,
                    proposal.self_consistency,
                ),
                None => (
                    ChangeSet::new(),
                    verification
                        .failure
                        .as_ref()
                        .map(|f| f.message.clone())
                        .unwrap_or_default(),
                    0.0,
                ),
            };

            let blast = analyze(&change_set, &facts.inventory);
            let breakdown = score(
                &verification,
                &blast,
                number,
                blast.risk_modifier(),
                self_consistency,
            );
            let confidence = breakdown.total;

            let decision = if let Some(err) = integrity {
                let _entered = attempt_span.enter();
                tracing::error!(confidence, "aborting: {}", err);
                Some(Decision::integrity_violation(number, confidence, &err.to_string()))
            } else if deadline_hit {
                let _entered = attempt_span.enter();
                tracing::warn!(elapsed_ms = elapsed_ms(started), "incident deadline reached mid-attempt");
                Some(Decision::incident_timeout(
                    Some(number),
                    confidence,
                    elapsed_ms(started),
                ))
            } else {
                None
            };

            let attempt = Attempt {
                number,
                started_at,
                change_set,
                rationale,
                verification,
                blast_radius: blast,
                breakdown,
                elapsed_ms: elapsed_ms(attempt_clock),
            };

            if let Some(decision) = decision {
                attempts.push(attempt);
                return finish(incident, decision, attempts, started);
            }

            let decision = decide(
                &attempt.breakdown,
                &attempt.blast_radius,
                &attempt.verification,
                number,
                max_attempts,
            );
            {
                let _entered = attempt_span.enter();
                tracing::info!(
                    decision = %decision.kind,
                    rule = ?decision.rule,
                    confidence,
                    passed = attempt.verification.passed,
                    total = attempt.verification.total,
                    files_changed = attempt.blast_radius.files_changed,
                    "{}",
                    decision.rationale
                );
            }

            let retry = decision.is_retryable() && number < max_attempts && !exhausted;
            if retry {
                feedback = Some(AttemptFeedback {
                    attempt: number,
                    rationale: decision.rationale.clone(),
                    verification: attempt.verification.clone(),
                    failure_output: tail_chars(&attempt.verification.output, FEEDBACK_TAIL_CHARS),
                });
            }
            attempts.push(attempt);
            if !retry {
                return finish(incident, decision, attempts, started);
            }
        }

        // the final attempt always returns above
        self.timed_out(incident, attempts, started)
    }

    /// Inventory and command discovery, off the async threads.
    async fn survey(&self, incident: &Incident) -> RepoFacts {
        let root = incident.repo_root.clone();
        let discover = incident.verification_commands.is_empty();
        let joined = tokio::task::spawn_blocking(move || {
            let inventory = match RepoInventory::scan(&root) {
                Ok(inventory) => {
                    tracing::debug!(source = inventory.source.as_str(), "inventory scanned");
                    inventory.files
                }
                Err(err) => {
                    tracing::warn!(root = %root.display(), "inventory scan failed: {:#}", err);
                    Vec::new()
                }
            };
            let discovered = if discover {
                discover_verification_commands(&root)
            } else {
                Vec::new()
            };
            RepoFacts {
                inventory,
                discovered,
            }
        })
        .await;

        match joined {
            Ok(facts) => {
                tracing::debug!(
                    files = facts.inventory.len(),
                    discovered = facts.discovered.len(),
                    "repository surveyed"
                );
                facts
            }
            Err(err) => {
                tracing::warn!("repository survey failed: {}", err);
                RepoFacts::default()
            }
        }
    }

    /// Declared commands win, then discovered ones, then the proposal's.
    fn commands_for(
        &self,
        incident: &Incident,
        facts: &RepoFacts,
        proposal: &Proposal,
    ) -> Vec<VerificationCommand> {
        if !incident.verification_commands.is_empty() {
            return incident.verification_commands.clone();
        }
        let fallback = if facts.discovered.is_empty() {
            &proposal.verification_commands
        } else {
            &facts.discovered
        };
        fallback.iter().map(VerificationCommand::new).collect()
    }

    async fn trial(
        &self,
        incident: &Incident,
        proposer: &dyn FixProposer,
        request: &ProposalRequest<'_>,
        facts: &RepoFacts,
        state: &mut TrialState,
    ) -> VerificationResult {
        let proposal = match proposer.propose(request).await {
            Ok(proposal) => proposal,
            Err(failure) => {
                tracing::warn!(proposer = proposer.name(), "no usable proposal: {}", failure);
                let err = RepairError::from(failure.clone());
                state.proposer_failure = Some(failure);
                return VerificationResult::unusable(AttemptFailure::from(&err));
            }
        };
        let commands = self.commands_for(incident, facts, &proposal);
        let change_set = proposal.change_set.clone();
        tracing::debug!(
            files = change_set.len(),
            commands = commands.len(),
            self_consistency = proposal.self_consistency,
            "proposal received"
        );
        state.proposal = Some(proposal);

        let root = incident.repo_root.clone();
        let label = format!("{}-a{}", incident.id, request.attempt);
        let options = self.settings.sandbox.clone();
        let preparing = state
            .preparing
            .insert(tokio::task::spawn_blocking(move || Sandbox::prepare(&root, &label, &options)));
        let prepared = preparing.await;
        state.preparing = None;
        let sandbox = match prepared {
            Ok(Ok(sandbox)) => state.sandbox.insert(sandbox),
            Ok(Err(err)) => return unusable(&err),
            Err(join) => {
                return unusable(&RepairError::io("preparing sandbox", std::io::Error::other(join)))
            }
        };

        if let Err(err) = sandbox.apply(&change_set) {
            tracing::warn!("change set rejected: {}", err);
            return unusable(&err);
        }
        if commands.is_empty() {
            tracing::warn!("no verification commands declared or discovered");
        }
        sandbox.run(&commands, self.settings.command_timeout).await
    }

    fn timed_out(
        &self,
        incident: &Incident,
        attempts: Vec<Attempt>,
        started: Instant,
    ) -> IncidentResult {
        let last = attempts.last();
        let decision = Decision::incident_timeout(
            last.map(|a| a.number),
            last.map(|a| a.breakdown.total).unwrap_or(0.0),
            elapsed_ms(started),
        );
        tracing::warn!("{}", decision.rationale);
        finish(incident, decision, attempts, started)
    }
}

async fn teardown(sandbox: Sandbox) -> Result<(), RepairError> {
    let root = sandbox.source_root().to_path_buf();
    match tokio::task::spawn_blocking(move || sandbox.teardown()).await {
        Ok(result) => result,
        // the integrity check never finished
        Err(join) => Err(RepairError::IntegrityUnverified {
            root,
            reason: format!("teardown did not complete: {}", join),
        }),
    }
}

fn unusable(err: &RepairError) -> VerificationResult {
    VerificationResult::unusable(AttemptFailure::from(err))
}

fn finish(
    incident: &Incident,
    decision: Decision,
    attempts: Vec<Attempt>,
    started: Instant,
) -> IncidentResult {
    tracing::info!(
        decision = %decision.kind,
        attempts = attempts.len(),
        confidence = decision.confidence,
        "repair finished"
    );
    IncidentResult {
        incident_id: incident.id.clone(),
        decision,
        attempts,
        elapsed_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let config = NightingaleConfig {
            max_attempts: 5,
            command_timeout_secs: 7,
            incident_timeout_secs: 120,
            ..NightingaleConfig::default()
        };
        let settings = LoopSettings::from_config(&config);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.command_timeout, Duration::from_secs(7));
        assert_eq!(settings.incident_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn interrupted_prepare_is_settled_for_teardown() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.py"), "A = 1\n").unwrap();
        let parent = tempfile::tempdir().unwrap();
        let options = SandboxOptions {
            parent: parent.path().to_path_buf(),
            ..SandboxOptions::default()
        };
        let root = source.path().to_path_buf();

        let mut state = TrialState {
            preparing: Some(tokio::task::spawn_blocking(move || {
                Sandbox::prepare(&root, "late", &options)
            })),
            ..TrialState::default()
        };
        state.settle().await;
        assert!(state.preparing.is_none());
        let sandbox = state.sandbox.take().unwrap();
        assert!(sandbox.root().join("a.py").exists());

        std::fs::write(source.path().join("a.py"), "A = 2\n").unwrap();
        let err = teardown(sandbox).await.unwrap_err();
        assert!(err.is_fatal());

        // nothing pending is a no-op
        let mut idle = TrialState::default();
        idle.settle().await;
        assert!(idle.sandbox.is_none());
    }

    #[test]
    fn declared_commands_take_priority() {
        let repair = RepairLoop::new(LoopSettings::default());
        let proposal = Proposal {
            verification_commands: vec!["make check".to_string()],
            ..Proposal::default()
        };
        let facts = RepoFacts {
            inventory: Vec::new(),
            discovered: vec!["npm test".to_string()],
        };

        let declared = Incident::new("i", "c", "/tmp")
            .with_verification(vec![VerificationCommand::fatal("pytest -q")]);
        assert_eq!(
            repair.commands_for(&declared, &facts, &proposal),
            vec![VerificationCommand::fatal("pytest -q")]
        );

        let bare = Incident::new("i", "c", "/tmp");
        assert_eq!(
            repair.commands_for(&bare, &facts, &proposal),
            vec![VerificationCommand::new("npm test")]
        );
        assert_eq!(
            repair.commands_for(&bare, &RepoFacts::default(), &proposal),
            vec![VerificationCommand::new("make check")]
        );
    }
}
