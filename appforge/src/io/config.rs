//! Engine configuration stored under `.appforge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffPolicy;

/// Engine configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Upper bound on agent iterations per task.
    pub max_iterations: u32,

    /// When set, per-iteration transcripts are written under this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,

    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub artifact: ArtifactConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Client id used when the caller does not identify itself.
    pub default_client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub kind: SandboxKind,
    /// Absolute workspace root the agent is told about.
    pub root: String,
    /// Parent directory for local workspaces.
    pub local_dir: PathBuf,
    pub remote_url: String,
    pub template: String,
    /// Port the generated app is served on.
    pub port: u16,
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactConfig {
    /// File whose contents decide verification.
    pub primary_path: String,
    pub preview_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// One JSON file per task record.
    pub dir: PathBuf,
    pub list_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            transcript_dir: None,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            model: ModelConfig::default(),
            sandbox: SandboxConfig::default(),
            artifact: ArtifactConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 2,
            window_secs: 120,
            default_client_id: "default-client".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            max_tokens: 8_192,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            kind: SandboxKind::Local,
            root: "/home/user".to_string(),
            local_dir: PathBuf::from(".appforge/sandboxes"),
            remote_url: "http://127.0.0.1:8787".to_string(),
            template: "nextjs-app".to_string(),
            port: 3000,
            command_timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            primary_path: "app/page.tsx".to_string(),
            preview_chars: 500,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".appforge/tasks"),
            list_limit: 10,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(anyhow!("rate_limit.max_requests must be > 0"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(anyhow!("rate_limit.window_secs must be > 0"));
        }
        if self.rate_limit.default_client_id.trim().is_empty() {
            return Err(anyhow!("rate_limit.default_client_id must be non-empty"));
        }
        if self.model.base_url.trim().is_empty() || self.model.model.trim().is_empty() {
            return Err(anyhow!("model.base_url and model.model must be non-empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if !self.sandbox.root.starts_with('/') {
            return Err(anyhow!("sandbox.root must be an absolute path"));
        }
        if self.sandbox.command_timeout_secs == 0 {
            return Err(anyhow!("sandbox.command_timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.kind == SandboxKind::Remote && self.sandbox.remote_url.trim().is_empty() {
            return Err(anyhow!("sandbox.remote_url is required for the remote sandbox"));
        }
        crate::core::path::workspace_relative(&self.sandbox.root, &self.artifact.primary_path)
            .map_err(|err| anyhow!("artifact.primary_path: {err}"))?;
        if self.store.list_limit == 0 {
            return Err(anyhow!("store.list_limit must be > 0"));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_jitter: Duration::from_millis(self.retry.max_jitter_ms),
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    /// Resolve relative directories against the project root.
    pub fn resolve_dirs(mut self, project_root: &Path) -> Self {
        let resolve = |dir: &Path| {
            if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                project_root.join(dir)
            }
        };
        self.store.dir = resolve(&self.store.dir);
        self.sandbox.local_dir = resolve(&self.sandbox.local_dir);
        self.transcript_dir = self.transcript_dir.as_deref().map(resolve);
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.transcript_dir = Some(PathBuf::from(".appforge/transcripts"));
        cfg.sandbox.kind = SandboxKind::Remote;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 4\n[rate_limit]\nmax_requests = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 4);
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 120);
        assert_eq!(cfg.artifact.primary_path, "app/page.tsx");
    }

    #[test]
    fn rejects_zero_iterations_and_escaping_artifact() {
        let mut cfg = AppConfig {
            max_iterations: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
        cfg.max_iterations = 3;
        cfg.artifact.primary_path = "../outside.tsx".to_string();
        let err = cfg.validate().expect_err("escaping path");
        assert!(err.to_string().contains("artifact.primary_path"));
    }

    #[test]
    fn backoff_reflects_retry_section() {
        let cfg = AppConfig::default();
        let policy = cfg.backoff();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn resolve_dirs_anchors_relative_paths() {
        let cfg = AppConfig::default().resolve_dirs(Path::new("/srv/project"));
        assert_eq!(cfg.store.dir, PathBuf::from("/srv/project/.appforge/tasks"));
        assert_eq!(
            cfg.sandbox.local_dir,
            PathBuf::from("/srv/project/.appforge/sandboxes")
        );
    }
}
