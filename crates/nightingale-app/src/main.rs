//! Nightingale - verify proposed CI fixes in a sandbox and decide what to do
//! with them.

mod logging;
mod self_check;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nightingale_adapters::context::gather_context_files;
use nightingale_adapters::{NightingaleConfig, RepoInventory};
use nightingale_core::{DecisionKind, FixProposer, Incident};
use nightingale_engine::{CommandProposer, LoopSettings, RepairLoop, ReplayProposer};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "nightingale",
    about = "Sandboxed verification and resolve/escalate/abort decisions for CI fixes",
    version
)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the attempt loop for one incident and print the result as JSON
    Run(RunArgs),
    /// Check configuration and environment
    SelfCheck(SelfCheckArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Incident description (JSON)
    #[arg(long)]
    incident: PathBuf,

    /// Replay recorded proposals (JSON object or array) instead of calling a proposer
    #[arg(long, conflicts_with = "proposer_cmd")]
    replay: Option<PathBuf>,

    /// Shell command that reads a request on stdin and prints a proposal
    #[arg(long)]
    proposer_cmd: Option<String>,

    /// Repository to repair (overrides the incident's repo_root)
    #[arg(long)]
    repo: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args, Debug)]
struct SelfCheckArgs {
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_json);
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::SelfCheck(args) => run_self_check(args),
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut incident = load_incident(&args.incident)?;
    let repo = args.repo.clone().unwrap_or_else(|| incident.repo_root.clone());
    let repo = repo
        .canonicalize()
        .with_context(|| format!("Repository '{}' not found", repo.display()))?;
    incident.repo_root = repo.clone();

    let mut config = NightingaleConfig::load(args.config.as_deref(), &repo)?;
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
        config.sanitize();
    }
    tracing::debug!(config = %config.location(), "configuration loaded");

    if incident.context_files.is_empty() && !incident.failure_log.is_empty() {
        let inventory = RepoInventory::scan(&repo)?;
        incident.context_files = gather_context_files(
            &repo,
            &inventory.files,
            &incident.failure_log,
            config.context_file_limit,
        );
        tracing::debug!(files = incident.context_files.len(), "context gathered from failure log");
    }

    let proposer = build_proposer(&args, &config, &repo)?;
    let repair = RepairLoop::new(LoopSettings::from_config(&config));
    let result = repair.run(&incident, proposer.as_ref()).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::from(match result.decision.kind {
        DecisionKind::Resolve => 0,
        DecisionKind::Escalate => 2,
        DecisionKind::Abort => 3,
    }))
}

fn load_incident(path: &Path) -> Result<Incident> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read incident '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse incident '{}'", path.display()))
}

fn build_proposer(
    args: &RunArgs,
    config: &NightingaleConfig,
    repo: &Path,
) -> Result<Box<dyn FixProposer>> {
    if let Some(path) = &args.replay {
        return Ok(Box::new(ReplayProposer::from_file(path)?));
    }
    let command = args
        .proposer_cmd
        .clone()
        .or_else(|| config.proposer_command.clone());
    match command {
        Some(command) => Ok(Box::new(CommandProposer::new(
            command,
            repo,
            config.proposer_timeout(),
        ))),
        None => bail!("No proposer: pass --replay or --proposer-cmd, or set proposer_command in the config"),
    }
}

fn run_self_check(args: SelfCheckArgs) -> Result<ExitCode> {
    let config = NightingaleConfig::load(args.config.as_deref(), &args.repo)?;
    let checks = self_check::run_checks(&args.repo, &config);
    print!("{}", self_check::render(&checks));

    let failed = checks.iter().filter(|c| !c.passed).count();
    if failed > 0 {
        bail!("{} of {} checks failed", failed, checks.len());
    }
    println!("  all {} checks passed", checks.len());
    Ok(ExitCode::SUCCESS)
}
