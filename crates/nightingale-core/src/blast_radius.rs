//! Blast radius analysis
//!
//! Measures how much of the repository a change touches and how sensitive the
//! touched files are. Classification is a fixed, ordered table of path rules:
//! the first tier with a matching rule wins, unmatched paths are LOW.

use crate::model::{normalize_change_path, ChangeSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Changes touching more than this fraction of the repository are never auto-applied.
pub const MAX_AUTO_RADIUS: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Score fed to the confidence scorer as `risk_modifier` (higher = safer).
    pub fn score(&self) -> f64 {
        match self {
            RiskTier::Critical => 0.0,
            RiskTier::High => 0.4,
            RiskTier::Medium => 0.7,
            RiskTier::Low => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum PathRule {
    /// Substring anywhere in the lowercased path.
    Contains(&'static str),
    /// File name starts with the given stem followed by `.` (e.g. `main.py`).
    Stem(&'static str),
    FileName(&'static str),
    FilePrefix(&'static str),
    /// Suffix on the file stem, e.g. `widget_test.go`.
    StemSuffix(&'static str),
}

impl PathRule {
    fn matches(&self, path: &str, file_name: &str) -> bool {
        match self {
            PathRule::Contains(needle) => path.contains(needle),
            PathRule::Stem(stem) => file_name
                .strip_prefix(stem)
                .is_some_and(|rest| rest.starts_with('.')),
            PathRule::FileName(name) => file_name == *name,
            PathRule::FilePrefix(prefix) => file_name.starts_with(prefix),
            PathRule::StemSuffix(suffix) => file_name
                .split_once('.')
                .is_some_and(|(stem, _)| stem.ends_with(suffix)),
        }
    }
}

const CRITICAL_RULES: &[PathRule] = &[
    PathRule::Contains("auth"),
    PathRule::Contains("security"),
    PathRule::Contains("password"),
    PathRule::Contains("database"),
    PathRule::Contains("migration"),
    PathRule::Contains("schema"),
    PathRule::Contains(".env"),
    PathRule::Contains("credentials"),
    PathRule::Contains("secret"),
    // CI/CD configuration
    PathRule::Contains(".github/workflows/"),
    PathRule::Contains(".gitlab-ci"),
    PathRule::Contains("jenkinsfile"),
    PathRule::Contains(".circleci/"),
    PathRule::Contains("azure-pipelines"),
    // Deploy configuration
    PathRule::Contains("deploy"),
    PathRule::Contains("dockerfile"),
    PathRule::Contains("docker-compose"),
    PathRule::Contains("helm/"),
    PathRule::Contains("k8s/"),
    PathRule::Contains("terraform/"),
];

const HIGH_RULES: &[PathRule] = &[
    PathRule::Contains("core/"),
    PathRule::Contains("models/"),
    PathRule::Stem("main"),
    PathRule::Stem("app"),
    PathRule::Stem("base"),
    PathRule::FileName("__init__.py"),
    PathRule::FileName("lib.rs"),
    PathRule::FileName("index.js"),
    PathRule::FileName("index.ts"),
];

const MEDIUM_RULES: &[PathRule] = &[
    PathRule::Contains("utils/"),
    PathRule::Contains("util/"),
    PathRule::Contains("helpers/"),
    PathRule::Contains("tools/"),
    PathRule::Stem("config"),
    PathRule::Stem("settings"),
];

const LOW_RULES: &[PathRule] = &[
    PathRule::Contains("tests/"),
    PathRule::Contains("test/"),
    PathRule::Contains("spec/"),
    PathRule::FilePrefix("test_"),
    PathRule::StemSuffix("_test"),
    PathRule::Contains(".test."),
    PathRule::Contains(".spec."),
    PathRule::Contains("docs/"),
    PathRule::Contains("examples/"),
    PathRule::Contains(".md"),
    PathRule::Contains(".txt"),
    PathRule::Contains(".rst"),
    PathRule::FilePrefix("readme"),
    PathRule::FilePrefix("license"),
    PathRule::FilePrefix("changelog"),
];

const TIERS: &[(RiskTier, &[PathRule])] = &[
    (RiskTier::Critical, CRITICAL_RULES),
    (RiskTier::High, HIGH_RULES),
    (RiskTier::Medium, MEDIUM_RULES),
    (RiskTier::Low, LOW_RULES),
];

/// Classify one repository-relative path.
pub fn classify_path(path: &str) -> RiskTier {
    let lower = path.replace('\\', "/").to_ascii_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(lower.as_str());
    for (tier, rules) in TIERS {
        if rules.iter().any(|rule| rule.matches(&lower, file_name)) {
            return *tier;
        }
    }
    RiskTier::Low
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusReport {
    pub files_changed: usize,
    pub total_files: usize,
    pub file_tiers: BTreeMap<String, RiskTier>,
    /// `files_changed / total_files`, clamped to [0,1].
    pub radius: f64,
    pub highest_tier: RiskTier,
    /// A CRITICAL file was touched; blocks auto-resolution regardless of score.
    pub hard_block: bool,
}

impl BlastRadiusReport {
    pub fn inverse_radius(&self) -> f64 {
        1.0 - self.radius
    }

    /// Lowest tier score among the changed files (1.0 when nothing changed).
    pub fn risk_modifier(&self) -> f64 {
        self.file_tiers
            .values()
            .map(RiskTier::score)
            .fold(1.0, f64::min)
    }

    pub fn exceeds_auto_radius(&self) -> bool {
        self.radius > MAX_AUTO_RADIUS
    }
}

/// Compute the blast radius of `change_set` against the repository inventory.
///
/// Paths are classified in normal form, so `ci/./deploy.sh` and `ci/deploy.sh`
/// are one CRITICAL file.
pub fn analyze<S: AsRef<str>>(change_set: &ChangeSet, inventory: &[S]) -> BlastRadiusReport {
    let file_tiers: BTreeMap<String, RiskTier> = change_set
        .paths()
        .map(|path| normalize_change_path(path).unwrap_or_else(|| path.to_string()))
        .map(|path| {
            let tier = classify_path(&path);
            (path, tier)
        })
        .collect();
    let files_changed = file_tiers.len();
    let total_files = inventory.len();
    let radius = if files_changed == 0 {
        0.0
    } else {
        (files_changed as f64 / total_files.max(1) as f64).clamp(0.0, 1.0)
    };
    let highest_tier = file_tiers
        .values()
        .copied()
        .max()
        .unwrap_or(RiskTier::Low);

    BlastRadiusReport {
        files_changed,
        total_files,
        file_tiers,
        radius,
        highest_tier,
        hard_block: highest_tier == RiskTier::Critical,
    }
}
