//! Fix proposer implementations.
//!
//! `ReplayProposer` serves recorded proposals, one per attempt.
//! `CommandProposer` delegates to an external program speaking JSON over
//! stdin/stdout.

use crate::proposal::{parse_proposal, parse_proposal_value};
use crate::runner::{run_command, CommandSpec};
use anyhow::{Context, Result};
use nightingale_adapters::util::tail_chars;
use nightingale_core::{FixProposer, ProposalFailure, ProposalFuture, ProposalRequest};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit status an external proposer uses to signal it is being rate limited.
pub const RATE_LIMITED_EXIT_CODE: i32 = 75;

/// Serves pre-recorded raw proposals: entry `n - 1` answers attempt `n`.
#[derive(Debug, Clone)]
pub struct ReplayProposer {
    name: String,
    recorded: Vec<serde_json::Value>,
}

impl ReplayProposer {
    pub fn new(recorded: Vec<serde_json::Value>) -> Self {
        Self {
            name: "replay".to_string(),
            recorded,
        }
    }

    /// Load a recording: a JSON array of proposals, or a single proposal.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file '{}'", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse replay file '{}'", path.display()))?;
        let recorded = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };
        let mut proposer = Self::new(recorded);
        proposer.name = format!("replay:{}", path.display());
        Ok(proposer)
    }

    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}

impl FixProposer for ReplayProposer {
    fn name(&self) -> &str {
        &self.name
    }

    fn propose<'a>(&'a self, request: &'a ProposalRequest<'a>) -> ProposalFuture<'a> {
        Box::pin(async move {
            let index = request.attempt.saturating_sub(1) as usize;
            let entry = self
                .recorded
                .get(index)
                .cloned()
                .ok_or(ProposalFailure::Exhausted)?;
            parse_proposal_value(entry)
        })
    }
}

/// Runs a shell command per attempt, writes the request JSON to its stdin and
/// parses its stdout as a proposal.
#[derive(Debug, Clone)]
pub struct CommandProposer {
    command: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandProposer {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout,
        }
    }
}

impl FixProposer for CommandProposer {
    fn name(&self) -> &str {
        &self.command
    }

    fn propose<'a>(&'a self, request: &'a ProposalRequest<'a>) -> ProposalFuture<'a> {
        Box::pin(async move {
            let payload = serde_json::to_string(request)
                .map_err(|e| ProposalFailure::Unavailable(format!("encoding request: {}", e)))?;
            let spec = CommandSpec::shell(&self.cwd, &self.command)
                .timeout(self.timeout)
                .stdin(payload);
            let run = run_command(&spec).await;

            if let Some(err) = run.error.as_ref().filter(|_| !run.spawned) {
                return Err(ProposalFailure::Unavailable(err.clone()));
            }
            if run.timed_out {
                return Err(ProposalFailure::Unavailable(format!(
                    "proposer timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            match run.exit_code {
                Some(0) => parse_proposal(&run.stdout),
                Some(RATE_LIMITED_EXIT_CODE) => Err(ProposalFailure::RateLimited {
                    retry_after_secs: run.stdout.trim().parse().unwrap_or(0),
                }),
                code => Err(ProposalFailure::Unavailable(format!(
                    "proposer exited with {:?}: {}",
                    code,
                    tail_chars(run.stderr.trim(), 500)
                ))),
            }
        })
    }
}
