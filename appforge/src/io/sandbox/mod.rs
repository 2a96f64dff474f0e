//! Sandboxed workspace contract and its adapters.
//!
//! A [`Workspace`] is bound to one ephemeral environment and is owned by a
//! single task run. Paths crossing this boundary are always workspace-relative;
//! adapters translate to their own convention internally.

mod local;
mod remote;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::config::{SandboxConfig, SandboxKind};

pub use local::{LocalSandboxProvider, LocalWorkspace};
pub use remote::{RemoteSandboxProvider, RemoteWorkspace};

/// Result of a command that ran to completion, whatever its exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The environment itself is gone or unreachable.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    /// A single operation failed; the environment is still usable.
    #[error("{message}")]
    Operation {
        message: String,
        stdout: String,
        stderr: String,
    },
}

impl SandboxError {
    pub fn operation(message: impl Into<String>) -> Self {
        SandboxError::Operation {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SandboxError::Unavailable(_))
    }
}

/// Capability handle over one provisioned environment.
pub trait Workspace: Send + Sync {
    fn id(&self) -> &str;

    /// Reachable address of the served application.
    fn address(&self) -> &str;

    fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError>;

    fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    fn read_file(&self, path: &str) -> Result<String, SandboxError>;
}

impl<W: Workspace + ?Sized> Workspace for Arc<W> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn address(&self) -> &str {
        (**self).address()
    }

    fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError> {
        (**self).run_command(command)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        (**self).write_file(path, content)
    }

    fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        (**self).read_file(path)
    }
}

impl fmt::Debug for dyn Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id())
            .field("address", &self.address())
            .finish()
    }
}

/// Creates fresh workspaces.
pub trait SandboxProvider: Send + Sync {
    fn provision(&self) -> Result<Box<dyn Workspace>, SandboxError>;
}

/// Build the provider selected by `sandbox.kind`.
pub fn provider_from_config(cfg: &SandboxConfig) -> Arc<dyn SandboxProvider> {
    match cfg.kind {
        SandboxKind::Local => Arc::new(LocalSandboxProvider::new(cfg)),
        SandboxKind::Remote => Arc::new(RemoteSandboxProvider::new(cfg)),
    }
}
