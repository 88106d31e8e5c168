//! Typed parsing of proposer output.
//!
//! Accepts the structured fix format
//! `{root_cause, rationale, files_to_change: [{file_path, change_type, content}],
//! verification_commands, confidence}` with the field aliases proposers
//! commonly emit. Anything that cannot become a well-formed [`ChangeSet`] is a
//! [`ProposalFailure::Malformed`].

use nightingale_core::{normalize_change_path, ChangeSet, Proposal, ProposalFailure};
use serde::Deserialize;

/// Self-consistency assumed when the proposer does not report one.
pub const DEFAULT_SELF_CONSISTENCY: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct WireProposal {
    #[serde(default)]
    root_cause: String,
    #[serde(default, alias = "explanation")]
    rationale: String,
    #[serde(default, alias = "files", alias = "changes")]
    files_to_change: Vec<WireFileChange>,
    #[serde(default, alias = "verification_steps")]
    verification_commands: Vec<String>,
    #[serde(default, alias = "self_consistency", alias = "confidence_score")]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireFileChange {
    #[serde(alias = "file", alias = "path")]
    file_path: String,
    #[serde(default, alias = "type", alias = "action")]
    change_type: Option<String>,
    #[serde(
        default,
        alias = "changes",
        alias = "patch",
        alias = "diff",
        alias = "code",
        alias = "diff_content"
    )]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Add,
    Modify,
    Delete,
}

fn change_kind(raw: Option<&str>, has_content: bool) -> Result<ChangeKind, String> {
    let Some(raw) = raw else {
        return Ok(if has_content {
            ChangeKind::Modify
        } else {
            ChangeKind::Delete
        });
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "add" | "create" => Ok(ChangeKind::Add),
        "modify" | "update" | "edit" => Ok(ChangeKind::Modify),
        "delete" | "remove" => Ok(ChangeKind::Delete),
        other => Err(format!("unknown change type '{}'", other)),
    }
}

/// Parse raw proposer output. Text around the JSON object (for example a
/// fenced code block) is ignored.
pub fn parse_proposal(raw: &str) -> Result<Proposal, ProposalFailure> {
    let json = extract_json_object(raw)
        .ok_or_else(|| ProposalFailure::Malformed("no JSON object in proposer output".to_string()))?;
    let wire: WireProposal =
        serde_json::from_str(json).map_err(|e| ProposalFailure::Malformed(e.to_string()))?;
    from_wire(wire)
}

pub fn parse_proposal_value(value: serde_json::Value) -> Result<Proposal, ProposalFailure> {
    let wire: WireProposal =
        serde_json::from_value(value).map_err(|e| ProposalFailure::Malformed(e.to_string()))?;
    from_wire(wire)
}

fn from_wire(wire: WireProposal) -> Result<Proposal, ProposalFailure> {
    let malformed = |msg: String| ProposalFailure::Malformed(msg);

    let self_consistency = match wire.confidence {
        None => DEFAULT_SELF_CONSISTENCY,
        Some(c) if (0.0..=1.0).contains(&c) => c,
        Some(c) => return Err(malformed(format!("confidence {} outside [0,1]", c))),
    };

    let mut change_set = ChangeSet::new();
    for change in wire.files_to_change {
        let raw_path = change.file_path.trim();
        if raw_path.is_empty() {
            return Err(malformed("file change with empty path".to_string()));
        }
        // unnormalizable paths stay verbatim so the sandbox rejects them as escapes
        let path = normalize_change_path(raw_path).unwrap_or_else(|| raw_path.to_string());
        if change_set.files.contains_key(&path) {
            return Err(malformed(format!("duplicate change for '{}'", path)));
        }
        let kind = change_kind(change.change_type.as_deref(), change.content.is_some())
            .map_err(|e| malformed(format!("{} for '{}'", e, path)))?;
        change_set = match (kind, change.content) {
            (ChangeKind::Delete, _) => change_set.delete(path),
            (_, Some(content)) => change_set.write(path, content),
            (_, None) => return Err(malformed(format!("missing content for '{}'", path))),
        };
    }

    let verification_commands = wire
        .verification_commands
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(Proposal {
        change_set,
        self_consistency,
        rationale: wire.rationale,
        root_cause: wire.root_cause,
        verification_commands,
    })
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
