//! Bounded child-process execution on the tokio runtime.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, cwd: impl AsRef<Path>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(60),
            env: Vec::new(),
            stdin: None,
        }
    }

    /// A shell command line, run with `sh -c` (`cmd /C` on Windows).
    pub fn shell(cwd: impl AsRef<Path>, command_line: &str) -> Self {
        #[cfg(windows)]
        let spec = Self::new(command_line, cwd, "cmd").args(&["/C", command_line]);
        #[cfg(not(windows))]
        let spec = Self::new(command_line, cwd, "sh").args(&["-c", command_line]);
        spec
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env_overrides(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRun {
    pub name: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the process could not be started or its I/O failed.
    pub error: Option<String>,
    pub spawned: bool,
    pub duration_ms: u64,
}

impl CommandRun {
    pub fn success(&self) -> bool {
        self.spawned && !self.timed_out && self.error.is_none() && self.exit_code == Some(0)
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Kills the child's process group when dropped, so subshells, pipelines and
/// anything else the shell forked die with it.
struct ProcessGroup {
    id: Option<u32>,
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        // 0 would address our own group
        if let Some(id) = self.id.filter(|id| *id > 1) {
            kill_group(id);
        }
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(id: u32) {
    let Ok(pgid) = libc::pid_t::try_from(id) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers; a negative pid addresses the group.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_id: u32) {}

/// Run `spec` to completion or until its timeout. The child leads its own
/// process group; on timeout, and when the returned future is dropped, the
/// whole group is killed and whatever it printed is discarded.
pub async fn run_command(spec: &CommandSpec) -> CommandRun {
    let mut run = CommandRun {
        name: spec.name.clone(),
        ..CommandRun::default()
    };

    let mut command = Command::new(&spec.program);
    command.args(&spec.args).current_dir(&spec.cwd);
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    if spec.stdin.is_some() {
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::null());
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);
    own_process_group(&mut command);

    let start = Instant::now();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            run.error = Some(format!("Failed to start command: {}", err));
            return run;
        }
    };
    run.spawned = true;
    let _group = ProcessGroup { id: child.id() };

    if let Some(input) = &spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(input.as_bytes()).await {
                run.error = Some(format!("Failed to write stdin: {}", err));
                let _ = child.kill().await;
                run.duration_ms = start.elapsed().as_millis() as u64;
                return run;
            }
            // closing stdin signals EOF to the child
            drop(stdin);
        }
    }

    match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            run.exit_code = output.status.code();
            run.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            run.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        }
        Ok(Err(err)) => {
            run.error = Some(format!("Failed to wait for command: {}", err));
        }
        Err(_) => {
            run.timed_out = true;
        }
    }
    run.duration_ms = start.elapsed().as_millis() as u64;
    run
}
