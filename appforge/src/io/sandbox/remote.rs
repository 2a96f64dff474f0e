//! HTTP client for a remote sandbox service.
//!
//! Contract:
//! - `POST /sandboxes {template, port}` -> `{sandbox_id, host}`
//! - `POST /sandboxes/{id}/commands {command}` -> `{stdout, stderr, exit_code}`
//! - `PUT /sandboxes/{id}/files?path=ABS` with the raw body
//! - `GET /sandboxes/{id}/files?path=ABS` -> raw body
//!
//! File paths are sent absolute, under the configured root, for both reads and
//! writes. `410 Gone`, `5xx` and transport failures mean the sandbox is lost.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, instrument};

use super::{CommandResult, SandboxError, SandboxProvider, Workspace};
use crate::core::path::workspace_absolute;
use crate::io::config::SandboxConfig;

#[derive(Debug, Clone)]
pub struct RemoteSandboxProvider {
    agent: ureq::Agent,
    base_url: String,
    template: String,
    port: u16,
    root: String,
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    sandbox_id: String,
    host: String,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    exit_code: i32,
}

#[derive(Debug, Default, Deserialize)]
struct FailureBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

impl RemoteSandboxProvider {
    pub fn new(cfg: &SandboxConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.command_timeout_secs))
            .build();
        Self {
            agent,
            base_url: cfg.remote_url.trim_end_matches('/').to_string(),
            template: cfg.template.clone(),
            port: cfg.port,
            root: cfg.root.clone(),
        }
    }
}

impl SandboxProvider for RemoteSandboxProvider {
    #[instrument(skip_all, fields(template = %self.template))]
    fn provision(&self) -> Result<Box<dyn Workspace>, SandboxError> {
        let url = format!("{}/sandboxes", self.base_url);
        let response = self
            .agent
            .post(&url)
            .send_json(json!({ "template": self.template, "port": self.port }))
            .map_err(|err| SandboxError::Unavailable(format!("provision sandbox: {err}")))?;
        let created: ProvisionResponse = response
            .into_json()
            .map_err(|err| SandboxError::Unavailable(format!("decode provision response: {err}")))?;
        info!(sandbox = %created.sandbox_id, host = %created.host, "provisioned remote sandbox");
        Ok(Box::new(RemoteWorkspace {
            agent: self.agent.clone(),
            endpoint: format!("{}/sandboxes/{}", self.base_url, created.sandbox_id),
            address: format!("https://{}", created.host),
            id: created.sandbox_id,
            root: self.root.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct RemoteWorkspace {
    agent: ureq::Agent,
    endpoint: String,
    id: String,
    address: String,
    root: String,
}

impl Workspace for RemoteWorkspace {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError> {
        let response = self
            .agent
            .post(&format!("{}/commands", self.endpoint))
            .send_json(json!({ "command": command }))
            .map_err(|err| classify("run command", err))?;
        let body: CommandResponse = response
            .into_json()
            .map_err(|err| SandboxError::operation(format!("decode command response: {err}")))?;
        Ok(CommandResult {
            stdout: body.stdout,
            stderr: body.stderr,
            exit_code: body.exit_code,
        })
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let absolute = workspace_absolute(&self.root, path);
        self.agent
            .put(&format!("{}/files", self.endpoint))
            .query("path", &absolute)
            .send_string(content)
            .map_err(|err| classify(&format!("write {path}"), err))?;
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let absolute = workspace_absolute(&self.root, path);
        let response = self
            .agent
            .get(&format!("{}/files", self.endpoint))
            .query("path", &absolute)
            .call()
            .map_err(|err| classify(&format!("read {path}"), err))?;
        response
            .into_string()
            .map_err(|err| SandboxError::operation(format!("read {path}: {err}")))
    }
}

fn classify(action: &str, err: ureq::Error) -> SandboxError {
    match err {
        ureq::Error::Status(code, _) if code == 410 || code >= 500 => {
            error!(action, code, "sandbox service failure");
            SandboxError::Unavailable(format!("{action}: HTTP {code}"))
        }
        ureq::Error::Status(code, response) => {
            let raw = response.into_string().unwrap_or_default();
            let body: FailureBody = serde_json::from_str(&raw).unwrap_or_default();
            let detail = body
                .error
                .unwrap_or_else(|| if raw.trim().is_empty() { format!("HTTP {code}") } else { raw });
            SandboxError::Operation {
                message: format!("{action}: {detail}"),
                stdout: body.stdout,
                stderr: body.stderr,
            }
        }
        ureq::Error::Transport(transport) => {
            error!(action, err = %transport, "sandbox transport failure");
            SandboxError::Unavailable(format!("{action}: {transport}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, body: &str) -> ureq::Error {
        let response = ureq::Response::new(code, "status", body).expect("response");
        ureq::Error::Status(code, response)
    }

    #[test]
    fn server_errors_and_gone_are_unavailable() {
        assert!(classify("run command", status(503, "")).is_unavailable());
        assert!(classify("run command", status(410, "")).is_unavailable());
    }

    #[test]
    fn client_errors_keep_partial_output() {
        let err = classify(
            "run command",
            status(
                422,
                r#"{"error":"stream closed","stdout":"building...","stderr":"warn"}"#,
            ),
        );
        match err {
            SandboxError::Operation {
                message,
                stdout,
                stderr,
            } => {
                assert_eq!(message, "run command: stream closed");
                assert_eq!(stdout, "building...");
                assert_eq!(stderr, "warn");
            }
            other => panic!("expected operation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_operation_error() {
        let err = classify("read app/page.tsx", status(404, ""));
        assert!(!err.is_unavailable());
        assert_eq!(err.to_string(), "read app/page.tsx: HTTP 404");
    }

    #[test]
    fn unreachable_service_fails_provisioning() {
        let provider = RemoteSandboxProvider::new(&SandboxConfig {
            remote_url: "http://127.0.0.1:9".to_string(),
            command_timeout_secs: 2,
            ..SandboxConfig::default()
        });
        let err = provider.provision().expect_err("unreachable");
        assert!(err.is_unavailable());
    }
}
