//! One agent step: a single model call followed by its tool calls.

use anyhow::Result;
use tracing::{debug, instrument};

use super::tools::{ToolOutcome, ToolSet};
use crate::core::error::RunError;
use crate::core::message::Message;
use crate::core::state::NetworkState;
use crate::io::config::AppConfig;
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::prompt::render_system_prompt;
use crate::io::sandbox::Workspace;

/// What one step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
    /// Messages appended to the conversation by this step, in order.
    pub messages: Vec<Message>,
    /// Tool names in call order.
    pub tool_calls: Vec<String>,
    pub files_written: Vec<String>,
    /// Filled by post-step hooks.
    pub summary: Option<String>,
}

/// The single coding agent driven by the network.
#[derive(Debug)]
pub struct CodeAgent {
    system_prompt: String,
    tools: ToolSet,
}

impl CodeAgent {
    pub fn new(system_prompt: String, tools: ToolSet) -> Self {
        Self {
            system_prompt,
            tools,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let tools = ToolSet::new(
            &cfg.artifact.primary_path,
            &cfg.sandbox.root,
            cfg.artifact.preview_chars,
        )?;
        let system_prompt = render_system_prompt(tools.primary_path(), &cfg.sandbox.root)?;
        Ok(Self::new(system_prompt, tools))
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Call the model once and run the tool calls it returns, in order.
    ///
    /// Every message is appended to `state.history` as it is produced, and
    /// files a tool wrote are merged into `state.files` right after that tool.
    #[instrument(skip_all, fields(workspace = workspace.id(), history = state.history.len()))]
    pub fn run_step(
        &self,
        model: &dyn ModelClient,
        workspace: &dyn Workspace,
        state: &mut NetworkState,
    ) -> Result<StepResult, RunError> {
        let response = model.complete(&ModelRequest {
            system: &self.system_prompt,
            messages: &state.history,
            tools: self.tools.specs(),
        })?;

        let mut result = StepResult::default();
        let assistant = Message::Assistant {
            content: response.text,
            tool_calls: response.tool_calls.clone(),
        };
        state.history.push(assistant.clone());
        result.messages.push(assistant);

        for call in &response.tool_calls {
            let outcome = match self.tools.parse(call) {
                Ok(invocation) => self.tools.invoke(&invocation, workspace, &state.history)?,
                Err(message) => ToolOutcome {
                    content: message,
                    written: None,
                },
            };
            debug!(tool = %call.name, bytes = outcome.content.len(), "tool finished");

            if let Some(written) = outcome.written {
                result.files_written.extend(written.keys().cloned());
                state.merge_files(written);
            }
            let message = Message::Tool {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: outcome.content,
            };
            state.history.push(message.clone());
            result.messages.push(message);
            result.tool_calls.push(call.name.clone());
        }

        Ok(result)
    }
}
