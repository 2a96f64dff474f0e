//! Directory-backed workspace running commands on the host shell.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{CommandResult, SandboxError, SandboxProvider, Workspace};
use crate::io::config::SandboxConfig;
use crate::io::process::run_shell;

/// Provisions one fresh directory per task under `local_dir`.
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    base_dir: PathBuf,
    port: u16,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl LocalSandboxProvider {
    pub fn new(cfg: &SandboxConfig) -> Self {
        Self {
            base_dir: cfg.local_dir.clone(),
            port: cfg.port,
            timeout: Duration::from_secs(cfg.command_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl SandboxProvider for LocalSandboxProvider {
    #[instrument(skip_all, fields(base_dir = %self.base_dir.display()))]
    fn provision(&self) -> Result<Box<dyn Workspace>, SandboxError> {
        let id = Uuid::new_v4().to_string();
        let dir = self.base_dir.join(&id);
        fs::create_dir_all(&dir).map_err(|err| {
            SandboxError::Unavailable(format!("create workspace {}: {err}", dir.display()))
        })?;
        info!(workspace = %id, "provisioned local workspace");
        Ok(Box::new(LocalWorkspace {
            id,
            dir,
            address: format!("http://localhost:{}", self.port),
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
        }))
    }
}

#[derive(Debug)]
pub struct LocalWorkspace {
    id: String,
    dir: PathBuf,
    address: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl LocalWorkspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_alive(&self) -> Result<(), SandboxError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(SandboxError::Unavailable(format!(
                "workspace directory {} is gone",
                self.dir.display()
            )))
        }
    }
}

impl Workspace for LocalWorkspace {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError> {
        self.ensure_alive()?;
        let output = run_shell(command, &self.dir, self.timeout, self.output_limit_bytes)
            .map_err(|err| SandboxError::Unavailable(format!("{err:#}")))?;
        if output.timed_out {
            return Err(SandboxError::Operation {
                message: format!("command timed out after {}s", self.timeout.as_secs()),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        let Some(exit_code) = output.exit_code else {
            return Err(SandboxError::Operation {
                message: "command terminated by a signal".to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        };
        debug!(exit_code, "local command finished");
        Ok(CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_alive()?;
        let target = self.dir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| SandboxError::operation(format!("create {}: {err}", parent.display())))?;
        }
        fs::write(&target, content)
            .map_err(|err| SandboxError::operation(format!("write {path}: {err}")))
    }

    fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_alive()?;
        fs::read_to_string(self.dir.join(path)).map_err(|err| match err.kind() {
            ErrorKind::NotFound => SandboxError::operation(format!("no such file: {path}")),
            _ => SandboxError::operation(format!("read {path}: {err}")),
        })
    }
}
