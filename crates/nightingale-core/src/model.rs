use crate::blast_radius::BlastRadiusReport;
use crate::confidence::ConfidenceBreakdown;
use crate::error::AttemptFailure;
use crate::resolution::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default bound on attempts per incident.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    #[default]
    TestFailure,
    BuildFailure,
    LintFailure,
    PipelineFailure,
}

impl IncidentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCategory::TestFailure => "test_failure",
            IncidentCategory::BuildFailure => "build_failure",
            IncidentCategory::LintFailure => "lint_failure",
            IncidentCategory::PipelineFailure => "pipeline_failure",
        }
    }
}

impl std::fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One shell command used to verify a candidate change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCommand {
    pub command: String,
    /// Stop the sequence when this command fails.
    #[serde(default)]
    pub fatal: bool,
}

impl VerificationCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fatal: false,
        }
    }

    pub fn fatal(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fatal: true,
        }
    }
}

/// A CI failure under repair. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(default)]
    pub category: IncidentCategory,
    /// Commit the failing pipeline ran against.
    pub commit: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub failure_log: String,
    /// Working tree the sandbox copies from.
    #[serde(default)]
    pub repo_root: PathBuf,
    /// Files (path -> content) handed to the proposer for analysis.
    #[serde(default)]
    pub context_files: BTreeMap<String, String>,
    #[serde(default)]
    pub verification_commands: Vec<VerificationCommand>,
}

impl Incident {
    pub fn new(
        id: impl Into<String>,
        commit: impl Into<String>,
        repo_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            category: IncidentCategory::default(),
            commit: commit.into(),
            branch: None,
            failure_log: String::new(),
            repo_root: repo_root.into(),
            context_files: BTreeMap::new(),
            verification_commands: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: IncidentCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_failure_log(mut self, log: impl Into<String>) -> Self {
        self.failure_log = log.into();
        self
    }

    pub fn with_verification(mut self, commands: Vec<VerificationCommand>) -> Self {
        self.verification_commands = commands;
        self
    }

    pub fn with_context_files(mut self, files: BTreeMap<String, String>) -> Self {
        self.context_files = files;
        self
    }
}

/// Lexical normal form of a repository-relative path: `/` separators and no
/// empty, `.` or `..` components. `None` for absolute paths, paths that climb
/// above the root, and paths that name the root itself.
pub fn normalize_change_path(path: &str) -> Option<String> {
    if path.starts_with(['/', '\\']) {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Proposed edits: path -> new full content, `None` deletes the file.
///
/// Keyed by path so application order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub files: BTreeMap<String, Option<String>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), Some(content.into()));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.files.insert(path.into(), None);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

impl TestCounts {
    pub fn new(passed: u32, failed: u32) -> Self {
        Self {
            passed,
            failed,
            total: passed.saturating_add(failed),
        }
    }

    pub fn merge(self, other: TestCounts) -> Self {
        Self {
            passed: self.passed.saturating_add(other.passed),
            failed: self.failed.saturating_add(other.failed),
            total: self.total.saturating_add(other.total),
        }
    }
}

/// Result of one verification command inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// The process never started (spawn failure).
    #[serde(default)]
    pub spawn_error: Option<String>,
    pub duration_ms: u64,
    /// Test counts when the output matched a known report format.
    pub counts: Option<TestCounts>,
}

impl CommandOutcome {
    pub fn started(&self) -> bool {
        self.spawn_error.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.started() && !self.timed_out && self.exit_code == Some(0)
    }
}

/// Normalized outcome of running the verification commands for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    /// Captured output (tail-truncated).
    pub output: String,
    pub duration_ms: u64,
    pub success: bool,
    /// At least one verification command actually started.
    pub executed: bool,
    #[serde(default)]
    pub commands: Vec<CommandOutcome>,
    /// Attempt-local error that degraded this result.
    #[serde(default)]
    pub failure: Option<AttemptFailure>,
}

impl VerificationResult {
    /// A result for an attempt that never reached (or never finished) verification.
    pub fn unusable(failure: AttemptFailure) -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
            output: failure.message.clone(),
            duration_ms: 0,
            success: false,
            executed: false,
            commands: Vec::new(),
            failure: Some(failure),
        }
    }

    /// True when the result carries any evidence: a command ran, or a known
    /// attempt-local error explains why nothing ran.
    pub fn has_signal(&self) -> bool {
        self.executed || self.failure.is_some()
    }

    pub fn counts(&self) -> TestCounts {
        TestCounts {
            passed: self.passed,
            failed: self.failed,
            total: self.total,
        }
    }
}

/// One full propose -> sandbox -> score -> decide cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub change_set: ChangeSet,
    #[serde(default)]
    pub rationale: String,
    pub verification: VerificationResult,
    pub blast_radius: BlastRadiusReport,
    pub breakdown: ConfidenceBreakdown,
    pub elapsed_ms: u64,
}

/// What the core returns for one incident: the terminal decision plus the
/// full evidence trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentResult {
    pub incident_id: String,
    pub decision: Decision,
    pub attempts: Vec<Attempt>,
    pub elapsed_ms: u64,
}

impl IncidentResult {
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }
}
