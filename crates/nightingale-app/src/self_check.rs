//! `nightingale self-check`: quick diagnostics before wiring the binary into CI.

use nightingale_adapters::util::truncate;
use nightingale_adapters::workflow::{discover, CommandSource};
use nightingale_adapters::NightingaleConfig;
use nightingale_core::confidence::weight_sum;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

pub fn run_checks(repo: &Path, config: &NightingaleConfig) -> Vec<Check> {
    let mut checks = Vec::new();

    let sum = weight_sum();
    checks.push(if (sum - 1.0).abs() < 1e-9 {
        Check::pass("confidence weights", format!("sum {:.2}", sum))
    } else {
        Check::fail("confidence weights", format!("sum {:.4}, expected 1.0", sum))
    });

    checks.push(if config.max_attempts > 1 {
        Check::pass("max attempts", config.max_attempts.to_string())
    } else {
        Check::fail(
            "max attempts",
            format!("{} leaves no room for a retry", config.max_attempts),
        )
    });

    let repo_ok = repo.is_dir();
    checks.push(if repo_ok {
        Check::pass("repository", repo.display().to_string())
    } else {
        Check::fail("repository", format!("{} is not a directory", repo.display()))
    });

    if repo_ok {
        let discovery = discover(repo);
        checks.push(match &discovery.source {
            CommandSource::Workflows(files) => Check::pass(
                "verification commands",
                format!("{} from {}", discovery.commands.len(), files.join(", ")),
            ),
            CommandSource::ProjectType(project) => Check::pass(
                "verification commands",
                format!("{} project: {}", project.name(), discovery.commands.join("; ")),
            ),
            CommandSource::Nothing => Check::fail(
                "verification commands",
                "none found; declare them on the incident",
            ),
        });
    }

    checks.push(sandbox_check(repo, config));

    checks.push(match config.proposer_command.as_deref() {
        Some(command) => Check::pass("proposer", command.to_string()),
        None => Check::fail(
            "proposer",
            format!("no proposer_command in {}", config.location()),
        ),
    });

    checks
}

fn sandbox_check(repo: &Path, config: &NightingaleConfig) -> Check {
    const NAME: &str = "sandbox root";
    let parent = config.sandbox_parent();
    if let (Ok(parent), Ok(repo)) = (parent.canonicalize(), repo.canonicalize()) {
        if parent.starts_with(&repo) {
            return Check::fail(NAME, format!("{} is inside the repository", parent.display()));
        }
    }
    if let Err(err) = fs::create_dir_all(&parent) {
        return Check::fail(NAME, format!("{}: {}", parent.display(), err));
    }
    let marker = parent.join(format!(".nightingale-write-check-{}", std::process::id()));
    match fs::write(&marker, b"ok") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            Check::pass(NAME, format!("{} writable", parent.display()))
        }
        Err(err) => Check::fail(NAME, format!("{} not writable: {}", parent.display(), err)),
    }
}

const DETAIL_WIDTH: usize = 100;

pub fn render(checks: &[Check]) -> String {
    let width = checks.iter().map(|c| c.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for check in checks {
        let status = if check.passed { "ok" } else { "FAIL" };
        out.push_str(&format!(
            "  {:<4}  {:<width$}  {}\n",
            status,
            check.name,
            truncate(&check.detail, DETAIL_WIDTH),
            width = width
        ));
    }
    out
}
