use crate::model::{ChangeSet, Incident, VerificationResult};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Why a proposer could not produce a usable change.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProposalFailure {
    #[error("proposer unavailable: {0}")]
    Unavailable(String),

    #[error("proposer rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("malformed proposal: {0}")]
    Malformed(String),

    #[error("proposer has no more proposals")]
    Exhausted,
}

/// What the previous attempt observed, handed to the proposer on retries.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFeedback {
    pub attempt: u32,
    pub rationale: String,
    pub verification: VerificationResult,
    /// Tail of the failing output ("what didn't work and why").
    pub failure_output: String,
}

/// Context bundle assembled fresh for every attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalRequest<'a> {
    pub incident: &'a Incident,
    pub attempt: u32,
    pub max_attempts: u32,
    /// `None` on the first attempt.
    pub feedback: Option<AttemptFeedback>,
}

/// A candidate fix from the external proposer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proposal {
    pub change_set: ChangeSet,
    /// Stability of the diagnosis across the proposer's own resampling, in [0,1].
    pub self_consistency: f64,
    pub rationale: String,
    pub root_cause: String,
    /// Commands the proposer suggests; used only when nothing else is declared.
    pub verification_commands: Vec<String>,
}

pub type ProposalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Proposal, ProposalFailure>> + Send + 'a>>;

/// The external fix proposer. Which reasoning engine sits behind it is not
/// this crate's concern; neither is rate limiting, which implementations may
/// surface as [`ProposalFailure::RateLimited`].
pub trait FixProposer: Send + Sync {
    fn name(&self) -> &str;

    fn propose<'a>(&'a self, request: &'a ProposalRequest<'a>) -> ProposalFuture<'a>;
}
