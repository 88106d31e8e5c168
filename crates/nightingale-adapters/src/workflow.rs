//! Verification command discovery
//!
//! Reads GitHub Actions workflows for test steps; when none are found, falls
//! back to a per-ecosystem default picked from the project's manifest files.

use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Words that mark a job, step, or command as test-related.
const TEST_KEYWORDS: &[&str] = &[
    "test", "pytest", "jest", "mocha", "rspec", "unittest", "nose", "check", "verify", "spec",
];

/// Detected project type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Python,
    Node,
    Go,
    Rust,
    Unknown,
}

impl ProjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectType::Python => "Python",
            ProjectType::Node => "Node.js",
            ProjectType::Go => "Go",
            ProjectType::Rust => "Rust",
            ProjectType::Unknown => "Unknown",
        }
    }

    /// Default test command for the ecosystem.
    pub fn test_command(&self) -> Option<&'static str> {
        match self {
            ProjectType::Python => Some("python -m pytest -v"),
            ProjectType::Node => Some("npm test"),
            ProjectType::Go => Some("go test ./..."),
            ProjectType::Rust => Some("cargo test"),
            ProjectType::Unknown => None,
        }
    }
}

/// Detect project type from files in directory
pub fn detect_project_type(repo_path: &Path) -> ProjectType {
    if repo_path.join("pyproject.toml").exists()
        || repo_path.join("setup.py").exists()
        || repo_path.join("requirements.txt").exists()
    {
        ProjectType::Python
    } else if repo_path.join("package.json").exists() {
        ProjectType::Node
    } else if repo_path.join("go.mod").exists() {
        ProjectType::Go
    } else if repo_path.join("Cargo.toml").exists() {
        ProjectType::Rust
    } else {
        ProjectType::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// Workflow files (repository-relative) that contributed commands.
    Workflows(Vec<String>),
    ProjectType(ProjectType),
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub commands: Vec<String>,
    pub source: CommandSource,
}

pub fn discover_verification_commands(repo_root: &Path) -> Vec<String> {
    discover(repo_root).commands
}

pub fn discover(repo_root: &Path) -> Discovery {
    let mut commands: Vec<String> = Vec::new();
    let mut contributing = Vec::new();

    for path in workflow_files(repo_root) {
        let found = match read_workflow(&path) {
            Some(doc) => extract_test_commands(&doc),
            None => continue,
        };
        if found.is_empty() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            contributing.push(format!(".github/workflows/{}", name));
        }
        for command in found {
            if !commands.contains(&command) {
                commands.push(command);
            }
        }
    }

    if !commands.is_empty() {
        return Discovery {
            commands,
            source: CommandSource::Workflows(contributing),
        };
    }

    let project = detect_project_type(repo_root);
    match project.test_command() {
        Some(command) => Discovery {
            commands: vec![command.to_string()],
            source: CommandSource::ProjectType(project),
        },
        None => Discovery {
            commands: Vec::new(),
            source: CommandSource::Nothing,
        },
    }
}

fn workflow_files(repo_root: &Path) -> Vec<PathBuf> {
    let dir = repo_root.join(".github").join("workflows");
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
        })
        .collect();
    files.sort();
    files
}

fn read_workflow(path: &Path) -> Option<Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(path = %path.display(), "failed to read workflow: {}", err);
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(doc) => Some(doc),
        Err(err) => {
            tracing::warn!(path = %path.display(), "failed to parse workflow: {}", err);
            None
        }
    }
}

fn mentions_test(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TEST_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Collect `run:` lines of test-related steps, skipping blanks and comments.
pub fn extract_test_commands(workflow: &Value) -> Vec<String> {
    let mut commands = Vec::new();
    let Some(jobs) = workflow.get("jobs").and_then(Value::as_mapping) else {
        return commands;
    };

    for (job_name, job) in jobs {
        let test_job = job_name.as_str().is_some_and(mentions_test);
        let Some(steps) = job.get("steps").and_then(Value::as_sequence) else {
            continue;
        };
        for step in steps {
            let Some(run) = step.get("run").and_then(Value::as_str) else {
                continue;
            };
            let step_name = step.get("name").and_then(Value::as_str).unwrap_or("");
            if !(test_job || mentions_test(step_name) || mentions_test(run)) {
                continue;
            }
            for line in run.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    commands.push(line.to_string());
                }
            }
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CI: &str = r#"
name: CI
on: [push]
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Format
        run: black --diff .
  unit-tests:
    runs-on: ubuntu-latest
    steps:
      - name: Install
        run: pip install -r requirements.txt
      - run: |
          # run the suite
          python -m pytest -q
"#;

    #[test]
    fn extracts_only_test_steps() {
        let doc: Value = serde_yaml::from_str(CI).unwrap();
        let commands = extract_test_commands(&doc);
        assert_eq!(
            commands,
            vec!["pip install -r requirements.txt", "python -m pytest -q"]
        );
    }

    #[test]
    fn discovers_and_dedupes_across_workflows() {
        let dir = tempdir().unwrap();
        let wf = dir.path().join(".github/workflows");
        fs::create_dir_all(&wf).unwrap();
        fs::write(wf.join("a.yml"), CI).unwrap();
        fs::write(
            wf.join("b.yaml"),
            "jobs:\n  check:\n    steps:\n      - run: python -m pytest -q\n      - run: mypy .\n",
        )
        .unwrap();
        fs::write(wf.join("broken.yml"), "jobs: [unclosed").unwrap();

        let discovery = discover(dir.path());
        assert_eq!(
            discovery.commands,
            vec![
                "pip install -r requirements.txt",
                "python -m pytest -q",
                "mypy .",
            ]
        );
        assert_eq!(
            discovery.source,
            CommandSource::Workflows(vec![
                ".github/workflows/a.yml".to_string(),
                ".github/workflows/b.yaml".to_string(),
            ])
        );
    }

    #[test]
    fn falls_back_to_project_type() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        assert_eq!(discover_verification_commands(dir.path()), vec!["go test ./..."]);

        fs::write(dir.path().join("requirements.txt"), "pytest\n").unwrap();
        let discovery = discover(dir.path());
        assert_eq!(discovery.commands, vec!["python -m pytest -v"]);
        assert_eq!(discovery.source, CommandSource::ProjectType(ProjectType::Python));
    }

    #[test]
    fn unknown_project_yields_nothing() {
        let dir = tempdir().unwrap();
        let discovery = discover(dir.path());
        assert!(discovery.commands.is_empty());
        assert_eq!(discovery.source, CommandSource::Nothing);
    }
}
