//! Error taxonomy for the repair core.
//!
//! `PathEscape`, `IoFailure`, `ProposalFailure` and `CommandTimeout` are local to
//! one attempt and only degrade its verification result. `SourceMutationDetected`,
//! `IntegrityUnverified` and `IncidentTimeout` end the whole run.

use crate::protocol::ProposalFailure;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("path escapes sandbox root: {path}")]
    PathEscape { path: String },

    #[error("sandbox I/O failure ({context}): {source}")]
    IoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("proposal failed: {0}")]
    ProposalFailure(#[from] ProposalFailure),

    #[error("command timed out after {timeout_ms}ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("source tree {} was modified during the run (before={before}, after={after})", .root.display())]
    SourceMutationDetected {
        root: PathBuf,
        before: String,
        after: String,
    },

    /// The source fingerprint could not be recomputed, so the source may have
    /// changed.
    #[error("source tree {} could not be verified after the run: {reason}", .root.display())]
    IntegrityUnverified { root: PathBuf, reason: String },

    #[error("incident timed out after {elapsed_ms}ms")]
    IncidentTimeout { elapsed_ms: u64 },
}

impl RepairError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RepairError::IoFailure {
            context: context.into(),
            source,
        }
    }

    /// Errors that end the incident instead of the attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RepairError::SourceMutationDetected { .. }
                | RepairError::IntegrityUnverified { .. }
                | RepairError::IncidentTimeout { .. }
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RepairError::PathEscape { .. } => FailureKind::PathEscape,
            RepairError::IoFailure { .. } => FailureKind::IoFailure,
            RepairError::ProposalFailure(_) => FailureKind::ProposalFailure,
            RepairError::CommandTimeout { .. } => FailureKind::CommandTimeout,
            RepairError::SourceMutationDetected { .. } | RepairError::IntegrityUnverified { .. } => {
                FailureKind::SourceMutationDetected
            }
            RepairError::IncidentTimeout { .. } => FailureKind::IncidentTimeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PathEscape,
    IoFailure,
    ProposalFailure,
    CommandTimeout,
    SourceMutationDetected,
    IncidentTimeout,
}

/// Serializable record of an error kept in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&RepairError> for AttemptFailure {
    fn from(err: &RepairError) -> Self {
        AttemptFailure::new(err.kind(), err.to_string())
    }
}
