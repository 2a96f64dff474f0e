//! The fixed tool set the agent may call.
//!
//! Arguments are validated against a JSON schema per tool and decoded into a
//! [`ToolInvocation`] before anything touches the workspace. Unknown tools and
//! invalid arguments come back to the model as an error string.
//!
//! Only infrastructure failures (the sandbox is gone) escape as [`RunError`].
//! Everything else becomes the tool's result text.

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::error::RunError;
use crate::core::message::{Message, ToolCallRequest};
use crate::core::path::workspace_relative;
use crate::core::placeholder::{ArtifactCheck, check_artifact};
use crate::core::types::FileMap;
use crate::io::model::ToolSpec;
use crate::io::sandbox::{SandboxError, Workspace};

pub const RUN_COMMAND: &str = "run_command";
pub const WRITE_FILES: &str = "write_files";
pub const READ_FILES: &str = "read_files";
pub const VERIFY_ARTIFACT: &str = "verify_artifact";
pub const LAST_ASSISTANT_MESSAGE: &str = "last_assistant_message";

/// Returned by [`last_assistant_message`] when no assistant text exists.
pub const NO_ASSISTANT_MESSAGE: &str = "No assistant message found";

struct ToolDef {
    name: &'static str,
    description: &'static str,
    schema: &'static str,
}

const TOOL_DEFS: &[ToolDef] = &[
    ToolDef {
        name: RUN_COMMAND,
        description: "Run a shell command in the project root. Returns stdout, stderr and exit_code.",
        schema: include_str!("../../schemas/tools/run_command.schema.json"),
    },
    ToolDef {
        name: WRITE_FILES,
        description: "Create or overwrite files. Paths are relative to the project root.",
        schema: include_str!("../../schemas/tools/write_files.schema.json"),
    },
    ToolDef {
        name: READ_FILES,
        description: "Read files by absolute path under the workspace root.",
        schema: include_str!("../../schemas/tools/read_files.schema.json"),
    },
    ToolDef {
        name: VERIFY_ARTIFACT,
        description: "Check whether the main page still contains the default template.",
        schema: include_str!("../../schemas/tools/verify_artifact.schema.json"),
    },
    ToolDef {
        name: LAST_ASSISTANT_MESSAGE,
        description: "Return your most recent plain-text message.",
        schema: include_str!("../../schemas/tools/last_assistant_message.schema.json"),
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    RunCommand { command: String },
    WriteFiles { files: Vec<FileWrite> },
    ReadFiles { paths: Vec<String> },
    VerifyArtifact,
    LastAssistantMessage,
}

#[derive(Deserialize)]
struct RunCommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct WriteFilesArgs {
    files: Vec<FileWrite>,
}

#[derive(Deserialize)]
struct ReadFilesArgs {
    paths: Vec<String>,
}

impl ToolInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::RunCommand { .. } => RUN_COMMAND,
            ToolInvocation::WriteFiles { .. } => WRITE_FILES,
            ToolInvocation::ReadFiles { .. } => READ_FILES,
            ToolInvocation::VerifyArtifact => VERIFY_ARTIFACT,
            ToolInvocation::LastAssistantMessage => LAST_ASSISTANT_MESSAGE,
        }
    }
}

/// What a tool hands back to the agent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Result text appended to the conversation.
    pub content: String,
    /// Files successfully written by this call.
    pub written: Option<FileMap>,
}

impl ToolOutcome {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            written: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReadFile<'a> {
    path: &'a str,
    content: String,
}

pub struct ToolSet {
    specs: Vec<ToolSpec>,
    validators: Vec<(&'static str, Validator)>,
    primary_path: String,
    root: String,
    preview_chars: usize,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.specs.iter().map(|s| s.name).collect::<Vec<_>>())
            .field("primary_path", &self.primary_path)
            .field("root", &self.root)
            .finish()
    }
}

impl ToolSet {
    /// Compile every tool schema. `primary_path` must be workspace-relative.
    pub fn new(primary_path: &str, root: &str, preview_chars: usize) -> Result<Self> {
        let primary_path = workspace_relative(root, primary_path)
            .map_err(|err| anyhow!("primary artifact path: {err}"))?;
        let mut specs = Vec::with_capacity(TOOL_DEFS.len());
        let mut validators = Vec::with_capacity(TOOL_DEFS.len());
        for def in TOOL_DEFS {
            let mut schema: Value = serde_json::from_str(def.schema)
                .with_context(|| format!("parse {} schema", def.name))?;
            let validator = jsonschema::validator_for(&schema)
                .map_err(|err| anyhow!("invalid {} schema: {err}", def.name))?;
            if let Some(object) = schema.as_object_mut() {
                object.remove("$schema");
                object.remove("title");
            }
            specs.push(ToolSpec {
                name: def.name,
                description: def.description,
                parameters: schema,
            });
            validators.push((def.name, validator));
        }
        Ok(Self {
            specs,
            validators,
            primary_path,
            root: root.to_string(),
            preview_chars,
        })
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn primary_path(&self) -> &str {
        &self.primary_path
    }

    /// Validate a raw call from the model.
    pub fn parse(&self, call: &ToolCallRequest) -> Result<ToolInvocation, String> {
        let Some((name, validator)) = self
            .validators
            .iter()
            .find(|(name, _)| *name == call.name)
        else {
            let known: Vec<&str> = self.validators.iter().map(|(name, _)| *name).collect();
            return Err(format!(
                "Error: unknown tool '{}'. Available tools: {}",
                call.name,
                known.join(", ")
            ));
        };

        let messages: Vec<String> = validator
            .iter_errors(&call.arguments)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(format!(
                "Error: invalid arguments for {name}: {}",
                messages.join("; ")
            ));
        }

        let decode_err = |err: serde_json::Error| format!("Error: invalid arguments for {name}: {err}");
        let invocation = match *name {
            RUN_COMMAND => {
                let args: RunCommandArgs =
                    serde_json::from_value(call.arguments.clone()).map_err(decode_err)?;
                ToolInvocation::RunCommand {
                    command: args.command,
                }
            }
            WRITE_FILES => {
                let args: WriteFilesArgs =
                    serde_json::from_value(call.arguments.clone()).map_err(decode_err)?;
                ToolInvocation::WriteFiles { files: args.files }
            }
            READ_FILES => {
                let args: ReadFilesArgs =
                    serde_json::from_value(call.arguments.clone()).map_err(decode_err)?;
                ToolInvocation::ReadFiles { paths: args.paths }
            }
            VERIFY_ARTIFACT => ToolInvocation::VerifyArtifact,
            _ => ToolInvocation::LastAssistantMessage,
        };
        Ok(invocation)
    }

    /// Execute a validated call against `workspace`.
    pub fn invoke(
        &self,
        invocation: &ToolInvocation,
        workspace: &dyn Workspace,
        history: &[Message],
    ) -> Result<ToolOutcome, RunError> {
        debug!(tool = invocation.name(), workspace = workspace.id(), "invoking tool");
        match invocation {
            ToolInvocation::RunCommand { command } => run_command(workspace, command),
            ToolInvocation::WriteFiles { files } => self.write_files(workspace, files),
            ToolInvocation::ReadFiles { paths } => self.read_files(workspace, paths),
            ToolInvocation::VerifyArtifact => {
                let check = self.verify_artifact(workspace)?;
                Ok(ToolOutcome::text(to_json(&check)))
            }
            ToolInvocation::LastAssistantMessage => {
                Ok(ToolOutcome::text(last_assistant_message(history)))
            }
        }
    }

    /// Write files sequentially, primary artifact first.
    ///
    /// Files written before a failure are still reported in `written`.
    fn write_files(
        &self,
        workspace: &dyn Workspace,
        files: &[FileWrite],
    ) -> Result<ToolOutcome, RunError> {
        let mut written = FileMap::new();
        let mut updated_paths = Vec::new();
        for file in primary_first(files, &self.primary_path, &self.root) {
            let failure = match workspace_relative(&self.root, &file.path) {
                Ok(path) => match workspace.write_file(&path, &file.content) {
                    Ok(()) => {
                        written.insert(path.clone(), file.content.clone());
                        updated_paths.push(path);
                        None
                    }
                    Err(err) => Some(absorb(err)?),
                },
                Err(err) => Some(err),
            };
            if let Some(error) = failure {
                warn!(path = %file.path, error = %error, "write_files stopped");
                let outcome = ToolOutcome {
                    content: to_json(&json!({
                        "success": false,
                        "error": error,
                        "updated_paths": updated_paths,
                    })),
                    written: (!written.is_empty()).then_some(written),
                };
                return Ok(outcome);
            }
        }
        Ok(ToolOutcome {
            content: to_json(&json!({ "success": true, "updated_paths": updated_paths })),
            written: Some(written),
        })
    }

    /// All-or-nothing batch read.
    fn read_files(
        &self,
        workspace: &dyn Workspace,
        paths: &[String],
    ) -> Result<ToolOutcome, RunError> {
        let mut results = Vec::with_capacity(paths.len());
        for requested in paths {
            let read = workspace_relative(&self.root, requested)
                .map_err(Some)
                .and_then(|path| workspace.read_file(&path).map_err(|err| absorb(err).ok()));
            match read {
                Ok(content) => results.push(ReadFile {
                    path: requested,
                    content,
                }),
                Err(Some(error)) => {
                    return Ok(ToolOutcome::text(format!("Error reading files: {error}")));
                }
                Err(None) => {
                    return Err(RunError::Provisioning(format!(
                        "workspace {} became unreachable while reading {requested}",
                        workspace.id()
                    )));
                }
            }
        }
        Ok(ToolOutcome::text(to_json(&results)))
    }

    /// Re-read the primary artifact and classify it.
    pub fn verify_artifact(&self, workspace: &dyn Workspace) -> Result<ArtifactCheck, RunError> {
        match workspace.read_file(&self.primary_path) {
            Ok(content) => Ok(check_artifact(
                &self.primary_path,
                &content,
                self.preview_chars,
            )),
            Err(SandboxError::Unavailable(message)) => Err(RunError::Provisioning(message)),
            Err(err) => Ok(ArtifactCheck::unreadable(&self.primary_path, &err.to_string())),
        }
    }
}

fn run_command(workspace: &dyn Workspace, command: &str) -> Result<ToolOutcome, RunError> {
    match workspace.run_command(command) {
        Ok(result) => Ok(ToolOutcome::text(to_json(&result))),
        Err(SandboxError::Unavailable(message)) => Err(RunError::Provisioning(message)),
        Err(SandboxError::Operation {
            message,
            stdout,
            stderr,
        }) => Ok(ToolOutcome::text(format!(
            "Command failed: {message}\nstdout: {stdout}\nstderr: {stderr}"
        ))),
    }
}

/// Convert a tool-level sandbox error to text; infrastructure errors escape.
fn absorb(err: SandboxError) -> Result<String, RunError> {
    match err {
        SandboxError::Unavailable(message) => Err(RunError::Provisioning(message)),
        other => Ok(other.to_string()),
    }
}

/// Stable partition: entries naming the primary artifact move to the front.
fn primary_first<'a>(files: &'a [FileWrite], primary: &str, root: &str) -> Vec<&'a FileWrite> {
    let is_primary =
        |file: &FileWrite| workspace_relative(root, &file.path).is_ok_and(|path| path == primary);
    let (mut ordered, rest): (Vec<_>, Vec<_>) = files.iter().partition(|file| is_primary(file));
    ordered.extend(rest);
    ordered
}

/// Most recent non-blank assistant text that came without tool calls, or
/// [`NO_ASSISTANT_MESSAGE`].
pub fn last_assistant_message(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find_map(Message::plain_assistant_text)
        .unwrap_or(NO_ASSISTANT_MESSAGE)
        .to_string()
}

/// Most recent non-blank assistant text, tool calls or not.
pub fn latest_assistant_text(messages: &[Message]) -> Option<&str> {
    messages.iter().rev().find_map(Message::assistant_text)
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("Error: serialize tool result: {err}"))
}
