//! Sandbox manager
//!
//! A disposable copy of a working tree. `prepare` fingerprints the source and
//! copies it, `apply` edits the copy only, `run` executes verification
//! commands inside it, and `teardown` deletes it and proves the source was not
//! touched. Dropping an un-torn-down sandbox still removes the copy.

use crate::outcome::{parse_test_counts, summarize};
use crate::runner::{run_command, CommandSpec};
use nightingale_adapters::config::default_secret_patterns;
use nightingale_adapters::util::{is_vcs_dir, relative_slash_path};
use nightingale_adapters::NightingaleConfig;
use nightingale_core::{ChangeSet, CommandOutcome, RepairError, VerificationCommand, VerificationResult};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;
use walkdir::WalkDir;

const SANDBOX_ROOT_DIR: &str = "nightingale-sandbox";

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Directory that will hold `nightingale-sandbox/<label>-<uuid>`.
    pub parent: PathBuf,
    pub secret_patterns: Vec<String>,
    pub output_tail_chars: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            parent: std::env::temp_dir(),
            secret_patterns: default_secret_patterns(),
            output_tail_chars: 8_000,
        }
    }
}

impl SandboxOptions {
    pub fn from_config(config: &NightingaleConfig) -> Self {
        Self {
            parent: config.sandbox_parent(),
            secret_patterns: config.secret_patterns.clone(),
            output_tail_chars: config.output_tail_chars,
        }
    }

    /// Directory all sandboxes under these options are created in.
    pub fn sandboxes_dir(&self) -> PathBuf {
        self.parent.join(SANDBOX_ROOT_DIR)
    }
}

/// Case-insensitive `*`-wildcard patterns matched against each path component.
#[derive(Debug, Clone)]
pub struct SecretFilter {
    patterns: Vec<Regex>,
}

impl SecretFilter {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| {
                let body = pattern
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                match Regex::new(&format!("(?i)^{}$", body)) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        tracing::warn!(pattern = %pattern, "ignoring secret pattern: {}", err);
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_secret(&self, relative: &str) -> bool {
        relative
            .split('/')
            .any(|component| self.patterns.iter().any(|re| re.is_match(component)))
    }
}

/// Content fingerprint of a tree: relative path, kind, size and bytes of every
/// entry outside VCS metadata and secret paths, in sorted walk order.
pub fn hash_tree(root: &Path, filter: &SecretFilter) -> Result<String, RepairError> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| keep_entry(root, e, filter));

    for entry in walker {
        let entry = entry.map_err(|err| {
            let context = format!("hashing {}", root.display());
            RepairError::io(context, err.into())
        })?;
        let Some(rel) = relative_slash_path(root, entry.path()) else {
            continue;
        };
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|e| RepairError::io(format!("reading link {}", rel), e))?;
            hasher.update(b"L\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            hasher.update(target.to_string_lossy().as_bytes());
        } else if file_type.is_dir() {
            hasher.update(b"D\0");
            hasher.update(rel.as_bytes());
        } else if file_type.is_file() {
            hasher.update(b"F\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            hash_file(&mut hasher, entry.path(), &rel)?;
        } else {
            // sockets, FIFOs and devices: opening one can fail or block
            hasher.update(b"S\0");
            hasher.update(special_kind(&file_type).as_bytes());
            hasher.update(b"\0");
            hasher.update(rel.as_bytes());
        }
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

fn hash_file(hasher: &mut Sha256, path: &Path, rel: &str) -> Result<(), RepairError> {
    let mut file = fs::File::open(path).map_err(|e| RepairError::io(format!("opening {}", rel), e))?;
    let len = file
        .metadata()
        .map_err(|e| RepairError::io(format!("reading metadata of {}", rel), e))?
        .len();
    hasher.update(len.to_le_bytes());
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| RepairError::io(format!("reading {}", rel), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

#[cfg(unix)]
fn special_kind(file_type: &fs::FileType) -> &'static str {
    use std::os::unix::fs::FileTypeExt;
    if file_type.is_socket() {
        "socket"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_block_device() {
        "block"
    } else if file_type.is_char_device() {
        "char"
    } else {
        "other"
    }
}

#[cfg(not(unix))]
fn special_kind(_file_type: &fs::FileType) -> &'static str {
    "other"
}

fn keep_entry(root: &Path, entry: &walkdir::DirEntry, filter: &SecretFilter) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    if entry.file_type().is_dir() && entry.file_name().to_str().is_some_and(is_vcs_dir) {
        return false;
    }
    match relative_slash_path(root, entry.path()) {
        Some(rel) => !filter.is_secret(&rel),
        None => true,
    }
}

/// Isolated copy of a working tree for one trial.
#[derive(Debug)]
pub struct Sandbox {
    source_root: PathBuf,
    root: PathBuf,
    sandboxes_dir: PathBuf,
    baseline_hash: String,
    filter: SecretFilter,
    output_tail_chars: usize,
    torn_down: bool,
}

impl Sandbox {
    /// Fingerprint `source_root` and copy it into a fresh directory.
    pub fn prepare(
        source_root: &Path,
        label: &str,
        options: &SandboxOptions,
    ) -> Result<Self, RepairError> {
        let source_root = source_root.canonicalize().map_err(|e| {
            RepairError::io(format!("resolving source root {}", source_root.display()), e)
        })?;
        let filter = SecretFilter::new(&options.secret_patterns);

        let parent = canonicalize_existing_parent(&options.parent)?;
        if parent.starts_with(&source_root) {
            return Err(RepairError::io(
                "placing sandbox",
                std::io::Error::other(format!(
                    "sandbox parent {} is inside the source tree",
                    options.parent.display()
                )),
            ));
        }
        let sandboxes_dir = options.sandboxes_dir();
        fs::create_dir_all(&sandboxes_dir).map_err(|e| {
            RepairError::io(format!("creating {}", sandboxes_dir.display()), e)
        })?;
        let sandboxes_dir = sandboxes_dir.canonicalize().map_err(|e| {
            RepairError::io(format!("resolving {}", sandboxes_dir.display()), e)
        })?;

        let baseline_hash = hash_tree(&source_root, &filter)?;

        let root = sandboxes_dir.join(format!(
            "{}-{}",
            sanitize_component(label),
            Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&root)
            .map_err(|e| RepairError::io(format!("creating sandbox {}", root.display()), e))?;

        let sandbox = Self {
            source_root,
            root,
            sandboxes_dir,
            baseline_hash,
            filter,
            output_tail_chars: options.output_tail_chars,
            torn_down: false,
        };
        // on error the Drop guard removes the partial copy
        sandbox.copy_source()?;
        tracing::debug!(
            sandbox = %sandbox.root.display(),
            hash = %sandbox.baseline_hash,
            "sandbox prepared"
        );
        Ok(sandbox)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn baseline_hash(&self) -> &str {
        &self.baseline_hash
    }

    pub fn env_overrides() -> Vec<(String, String)> {
        vec![
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GIT_ASKPASS".to_string(), "/bin/true".to_string()),
            ("NIGHTINGALE_SANDBOX".to_string(), "1".to_string()),
            ("NIGHTINGALE_DISABLE_PUSH".to_string(), "1".to_string()),
        ]
    }

    fn copy_source(&self) -> Result<(), RepairError> {
        let source = &self.source_root;
        let walker = WalkDir::new(source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| keep_entry(source, e, &self.filter));

        for entry in walker {
            let entry = entry.map_err(|err| {
                RepairError::io(format!("walking {}", source.display()), err.into())
            })?;
            let Some(rel) = relative_slash_path(source, entry.path()) else {
                continue;
            };
            let dest = self.root.join(&rel);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                fs::create_dir_all(&dest)
                    .map_err(|e| RepairError::io(format!("creating {}", rel), e))?;
                continue;
            }
            if !file_type.is_file() && !file_type.is_symlink() {
                tracing::debug!(path = %rel, "skipping special file");
                continue;
            }
            if file_type.is_symlink() {
                // file links are copied dereferenced; directory and dangling links are skipped
                match fs::metadata(entry.path()) {
                    Ok(meta) if meta.is_file() => {}
                    _ => {
                        tracing::debug!(path = %rel, "skipping non-file symlink");
                        continue;
                    }
                }
            }
            fs::copy(entry.path(), &dest).map_err(|e| RepairError::io(format!("copying {}", rel), e))?;
        }
        Ok(())
    }

    /// Resolve a change-set path to a location inside the sandbox.
    fn resolve(&self, path: &str) -> Result<PathBuf, RepairError> {
        let escape = || RepairError::PathEscape {
            path: path.to_string(),
        };

        let mut normalized = PathBuf::new();
        let mut depth = 0usize;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    normalized.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(escape());
                    }
                    normalized.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        if depth == 0 {
            return Err(escape());
        }

        let joined = self.root.join(&normalized);
        let parent = joined.parent().ok_or_else(escape)?;
        if !canonicalize_existing_parent(parent)?.starts_with(&self.root) {
            return Err(escape());
        }
        if let Ok(meta) = fs::symlink_metadata(&joined) {
            if meta.file_type().is_symlink() {
                let resolved = joined.canonicalize().unwrap_or_else(|_| joined.clone());
                if !resolved.starts_with(&self.root) {
                    return Err(escape());
                }
            }
        }
        Ok(joined)
    }

    /// Write or delete every file in `change_set`. All paths are validated
    /// before anything is written.
    pub fn apply(&self, change_set: &ChangeSet) -> Result<(), RepairError> {
        let mut resolved = Vec::with_capacity(change_set.len());
        for (path, content) in &change_set.files {
            resolved.push((path, self.resolve(path)?, content));
        }

        for (path, target, content) in resolved {
            match content {
                Some(content) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)
                            .map_err(|e| RepairError::io(format!("creating parent of {}", path), e))?;
                    }
                    fs::write(&target, content)
                        .map_err(|e| RepairError::io(format!("writing {}", path), e))?;
                }
                None => {
                    let removed = match fs::symlink_metadata(&target) {
                        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target),
                        Ok(_) => fs::remove_file(&target),
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                            tracing::debug!(path = %path, "delete of missing file ignored");
                            Ok(())
                        }
                        Err(err) => Err(err),
                    };
                    removed.map_err(|e| RepairError::io(format!("deleting {}", path), e))?;
                }
            }
        }
        Ok(())
    }

    /// Run verification commands in order. A failing `fatal` command stops
    /// the sequence; otherwise every command runs and results aggregate.
    pub async fn run(
        &self,
        commands: &[VerificationCommand],
        per_command_timeout: Duration,
    ) -> VerificationResult {
        let started = Instant::now();
        let env = Self::env_overrides();
        let mut outcomes = Vec::with_capacity(commands.len());
        let mut output = String::new();

        for verification in commands {
            let spec = CommandSpec::shell(&self.root, &verification.command)
                .timeout(per_command_timeout)
                .with_env_overrides(&env);
            let run = run_command(&spec).await;
            let text = run.combined_output();

            output.push_str(&format!("$ {}\n", verification.command));
            output.push_str(&text);
            if !text.ends_with('\n') {
                output.push('\n');
            }
            if run.timed_out {
                output.push_str(&format!(
                    "[timed out after {}ms]\n",
                    per_command_timeout.as_millis()
                ));
            }

            let outcome = CommandOutcome {
                command: verification.command.clone(),
                exit_code: run.exit_code,
                timed_out: run.timed_out,
                spawn_error: if run.spawned { None } else { run.error.clone() },
                duration_ms: run.duration_ms,
                counts: parse_test_counts(&text),
            };
            tracing::debug!(
                command = %outcome.command,
                exit_code = ?outcome.exit_code,
                timed_out = outcome.timed_out,
                duration_ms = outcome.duration_ms,
                "verification command finished"
            );
            let failed = !outcome.succeeded();
            outcomes.push(outcome);
            if failed && verification.fatal {
                tracing::debug!(command = %verification.command, "fatal command failed, stopping");
                break;
            }
        }

        summarize(
            outcomes,
            &output,
            started.elapsed().as_millis() as u64,
            self.output_tail_chars,
        )
    }

    /// Delete the copy and re-fingerprint the source. A changed or
    /// unverifiable fingerprint is reported ahead of any deletion error.
    pub fn teardown(mut self) -> Result<(), RepairError> {
        let removal = fs::remove_dir_all(&self.root);
        self.torn_down = true;
        let _ = fs::remove_dir(&self.sandboxes_dir);

        let after = if self.source_root.exists() {
            hash_tree(&self.source_root, &self.filter)
        } else {
            Ok("missing".to_string())
        };
        check_integrity(&self.source_root, &self.baseline_hash, after)?;

        removal.map_err(|e| RepairError::io(format!("removing sandbox {}", self.root.display()), e))?;
        tracing::debug!(sandbox = %self.root.display(), "sandbox torn down");
        Ok(())
    }
}

/// Compare a fresh fingerprint against the baseline. Failing to compute the
/// fingerprint is as fatal as a mismatch.
fn check_integrity(
    source_root: &Path,
    baseline: &str,
    after: Result<String, RepairError>,
) -> Result<(), RepairError> {
    let after = match after {
        Ok(after) => after,
        Err(err) => {
            tracing::error!(
                source = %source_root.display(),
                "source tree could not be re-fingerprinted: {}",
                err
            );
            return Err(RepairError::IntegrityUnverified {
                root: source_root.to_path_buf(),
                reason: err.to_string(),
            });
        }
    };
    if after != baseline {
        tracing::error!(
            source = %source_root.display(),
            before = %baseline,
            after = %after,
            "source tree changed during sandboxed run"
        );
        return Err(RepairError::SourceMutationDetected {
            root: source_root.to_path_buf(),
            before: baseline.to_string(),
            after,
        });
    }
    Ok(())
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(sandbox = %self.root.display(), "failed to remove abandoned sandbox: {}", err);
            }
        }
        let _ = fs::remove_dir(&self.sandboxes_dir);
    }
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, RepairError> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err(RepairError::PathEscape {
                path: path.display().to_string(),
            });
        }
    }
    current
        .canonicalize()
        .map_err(|e| RepairError::io(format!("resolving {}", current.display()), e))
}

fn sanitize_component(input: &str) -> String {
    let cleaned = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(64)
        .collect::<String>();
    if cleaned.is_empty() {
        "incident".to_string()
    } else {
        cleaned
    }
}
