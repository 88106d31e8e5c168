//! Configuration management for nightingale
//!
//! Looked up in order: an explicit path, `<repo>/.nightingale.toml`,
//! `~/.config/nightingale/config.toml`, then built-in defaults. A few
//! `NIGHTINGALE_*` environment variables override whatever was loaded.

use anyhow::{Context, Result};
use nightingale_core::DEFAULT_MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const REPO_CONFIG_FILE: &str = ".nightingale.toml";

const ENV_MAX_ATTEMPTS: &str = "NIGHTINGALE_MAX_ATTEMPTS";
const ENV_COMMAND_TIMEOUT: &str = "NIGHTINGALE_COMMAND_TIMEOUT_SECS";
const ENV_INCIDENT_TIMEOUT: &str = "NIGHTINGALE_INCIDENT_TIMEOUT_SECS";

const MAX_ATTEMPTS_CEILING: u32 = 10;
const MIN_OUTPUT_TAIL_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightingaleConfig {
    pub max_attempts: u32,
    pub command_timeout_secs: u64,
    pub incident_timeout_secs: u64,
    /// Denylist of path patterns (`*` wildcard) never copied into a sandbox.
    pub secret_patterns: Vec<String>,
    /// Parent directory for sandboxes; the system temp dir when unset.
    pub sandbox_root: Option<PathBuf>,
    /// How much captured command output is kept per verification.
    pub output_tail_chars: usize,
    /// Upper bound on files gathered from the failure log for the proposer.
    pub context_file_limit: usize,
    /// External proposer program used when `--proposer-cmd` is not given.
    pub proposer_command: Option<String>,
    pub proposer_timeout_secs: u64,

    /// Where this config was read from; `None` for defaults.
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

impl Default for NightingaleConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            command_timeout_secs: 60,
            incident_timeout_secs: 15 * 60,
            secret_patterns: default_secret_patterns(),
            sandbox_root: None,
            output_tail_chars: 8_000,
            context_file_limit: 20,
            proposer_command: None,
            proposer_timeout_secs: 300,
            loaded_from: None,
        }
    }
}

pub fn default_secret_patterns() -> Vec<String> {
    vec![
        ".env".to_string(),
        "*credentials*".to_string(),
        "*secret*".to_string(),
    ]
}

impl NightingaleConfig {
    pub fn sanitize(&mut self) {
        self.max_attempts = self.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING);
        self.command_timeout_secs = self.command_timeout_secs.max(1);
        self.incident_timeout_secs = self.incident_timeout_secs.max(1);
        self.proposer_timeout_secs = self.proposer_timeout_secs.max(1);
        self.output_tail_chars = self.output_tail_chars.max(MIN_OUTPUT_TAIL_CHARS);
        self.secret_patterns.retain(|p| !p.trim().is_empty());
        if self
            .proposer_command
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            self.proposer_command = None;
        }
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("nightingale").join("config.toml"))
    }

    /// Load config for `repo_root`.
    ///
    /// An explicit path must exist and parse. Discovered files that fail to
    /// parse are skipped with a warning and defaults are used instead.
    pub fn load(explicit: Option<&Path>, repo_root: &Path) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::read(path)?,
            None => Self::discover(repo_root),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.sanitize();
        Ok(config)
    }

    fn discover(repo_root: &Path) -> Self {
        let candidates = [
            Some(repo_root.join(REPO_CONFIG_FILE)),
            Self::user_config_path(),
        ];
        for path in candidates.into_iter().flatten() {
            if !path.is_file() {
                continue;
            }
            match Self::read(&path) {
                Ok(config) => return config,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        "config file is invalid, using defaults: {:#}",
                        err
                    );
                }
            }
        }
        Self::default()
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        let mut config: NightingaleConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config '{}'", path.display()))?;
        config.loaded_from = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply `NIGHTINGALE_*` overrides; unparsable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = parse_env(&lookup, ENV_MAX_ATTEMPTS) {
            self.max_attempts = value as u32;
        }
        if let Some(value) = parse_env(&lookup, ENV_COMMAND_TIMEOUT) {
            self.command_timeout_secs = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_INCIDENT_TIMEOUT) {
            self.incident_timeout_secs = value;
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn incident_timeout(&self) -> Duration {
        Duration::from_secs(self.incident_timeout_secs)
    }

    pub fn proposer_timeout(&self) -> Duration {
        Duration::from_secs(self.proposer_timeout_secs)
    }

    /// Directory sandboxes are created under.
    pub fn sandbox_parent(&self) -> PathBuf {
        self.sandbox_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn location(&self) -> String {
        self.loaded_from
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string())
    }
}

fn parse_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value.min(u32::MAX as u64)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = NightingaleConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.incident_timeout(), Duration::from_secs(900));
        assert!(config.secret_patterns.contains(&".env".to_string()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: NightingaleConfig = toml::from_str("max_attempts = 5\n").unwrap();
        assert_eq!(parsed.max_attempts, 5);
        assert_eq!(parsed.command_timeout_secs, 60);
    }

    #[test]
    fn test_sanitize_clamps() {
        let mut config = NightingaleConfig {
            max_attempts: 0,
            command_timeout_secs: 0,
            output_tail_chars: 1,
            secret_patterns: vec!["  ".to_string(), "*token*".to_string()],
            proposer_command: Some(" ".to_string()),
            ..NightingaleConfig::default()
        };
        config.sanitize();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.command_timeout_secs, 1);
        assert_eq!(config.output_tail_chars, MIN_OUTPUT_TAIL_CHARS);
        assert_eq!(config.secret_patterns, vec!["*token*".to_string()]);
        assert!(config.proposer_command.is_none());
    }

    #[test]
    fn test_repo_config_is_discovered() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(REPO_CONFIG_FILE),
            "command_timeout_secs = 5\nsecret_patterns = [\"*.pem\"]\n",
        )
        .unwrap();
        let config = NightingaleConfig::discover(dir.path());
        assert_eq!(config.command_timeout_secs, 5);
        assert_eq!(config.secret_patterns, vec!["*.pem".to_string()]);
        assert_eq!(config.loaded_from, Some(dir.path().join(REPO_CONFIG_FILE)));
    }

    #[test]
    fn test_corrupt_repo_config_falls_back() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(REPO_CONFIG_FILE), "max_attempts = \"many\"").unwrap();
        let config = NightingaleConfig::discover(dir.path());
        assert_ne!(config.loaded_from, Some(dir.path().join(REPO_CONFIG_FILE)));
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(NightingaleConfig::load(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_MAX_ATTEMPTS, "4"),
            (ENV_COMMAND_TIMEOUT, "abc"),
            (ENV_INCIDENT_TIMEOUT, " 30 "),
        ]
        .into_iter()
        .collect();
        let mut config = NightingaleConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.command_timeout_secs, 60);
        assert_eq!(config.incident_timeout_secs, 30);
    }
}
