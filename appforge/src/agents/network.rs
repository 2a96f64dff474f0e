//! The bounded iteration engine around the coding agent.

use tracing::{debug, info, instrument};

use super::step::{CodeAgent, StepResult};
use super::tools::latest_assistant_text;
use crate::core::error::RunError;
use crate::core::router::{Route, Router, SummaryRouter, next_route};
use crate::core::state::{IterationRecord, NetworkState};
use crate::core::summary::extract_task_summary;
use crate::io::model::ModelClient;
use crate::io::sandbox::Workspace;

/// Runs synchronously after every agent step. Must not have side effects.
pub type PostStepHook = fn(StepResult, &NetworkState) -> StepResult;

/// Pull a `<task_summary>` block out of the step's latest assistant text,
/// including text sent alongside tool calls.
pub fn summary_hook(mut result: StepResult, _state: &NetworkState) -> StepResult {
    if result.summary.is_none() {
        result.summary = latest_assistant_text(&result.messages).and_then(extract_task_summary);
    }
    result
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStop {
    Summary,
    /// The router halted without a summary.
    RouterHalt,
    /// The iteration ceiling was reached. Partial progress is kept.
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct NetworkOutcome {
    pub state: NetworkState,
    /// Agent steps actually invoked.
    pub iterations: u32,
    pub stop: NetworkStop,
}

pub struct Network {
    agent: CodeAgent,
    router: Box<dyn Router>,
    max_iterations: u32,
    hooks: Vec<PostStepHook>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("agent", &self.agent)
            .field("max_iterations", &self.max_iterations)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Network {
    /// A network with [`SummaryRouter`] and [`summary_hook`].
    pub fn new(agent: CodeAgent, max_iterations: u32) -> Self {
        Self {
            agent,
            router: Box::new(SummaryRouter),
            max_iterations,
            hooks: vec![summary_hook],
        }
    }

    pub fn with_router(mut self, router: impl Router + 'static) -> Self {
        self.router = Box::new(router);
        self
    }

    pub fn with_hook(mut self, hook: PostStepHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn agent(&self) -> &CodeAgent {
        &self.agent
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Drive the agent until the router halts or the ceiling is hit.
    ///
    /// `on_iteration` observes each completed step. Exceeding the ceiling is a
    /// normal stop, not an error.
    #[instrument(skip_all, fields(workspace = workspace.id(), max_iterations = self.max_iterations))]
    pub fn run(
        &self,
        model: &dyn ModelClient,
        workspace: &dyn Workspace,
        instruction: &str,
        mut on_iteration: impl FnMut(&IterationRecord),
    ) -> Result<NetworkOutcome, RunError> {
        let mut state = NetworkState::seeded(instruction);
        let mut iterations = 0u32;

        let stop = loop {
            if next_route(self.router.as_ref(), &state) == Route::Halt {
                break if state.has_summary() {
                    NetworkStop::Summary
                } else {
                    NetworkStop::RouterHalt
                };
            }
            if iterations >= self.max_iterations {
                break NetworkStop::MaxIterations;
            }
            iterations += 1;

            let mut result = self.agent.run_step(model, workspace, &mut state)?;
            for hook in &self.hooks {
                result = hook(result, &state);
            }
            if let Some(summary) = result.summary.as_deref() {
                state.set_summary(summary);
            }
            debug!(iteration = iterations, tools = result.tool_calls.len(), "step finished");

            on_iteration(&IterationRecord {
                iteration: iterations,
                tool_calls: result.tool_calls,
                produced_summary: state.has_summary(),
                files_written: result.files_written,
            });
        };

        info!(iterations, stop = ?stop, files = state.files.len(), "network finished");
        Ok(NetworkOutcome {
            state,
            iterations,
            stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::io::config::AppConfig;
    use crate::io::model::{ModelError, ModelResponse};
    use crate::test_support::{FakeWorkspace, ScriptedModel, text_response, tool_call};

    fn network(max_iterations: u32) -> Network {
        let agent = CodeAgent::from_config(&AppConfig::default()).expect("agent");
        Network::new(agent, max_iterations)
    }

    fn tool_turn() -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse {
            text: None,
            tool_calls: vec![tool_call("run_command", json!({"command": "ls"}))],
        })
    }

    #[test]
    fn halts_right_after_summary() {
        let model = ScriptedModel::new(vec![
            tool_turn(),
            text_response("Done.\n<task_summary>\nBuilt a counter.\n</task_summary>"),
            tool_turn(),
        ]);
        let ws = Arc::new(FakeWorkspace::new());
        let mut seen = Vec::new();

        let outcome = network(10)
            .run(&model, &ws, "build a counter app", |rec| seen.push(rec.clone()))
            .expect("run");

        assert_eq!(outcome.stop, NetworkStop::Summary);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(model.calls(), 2);
        assert_eq!(outcome.state.summary.as_deref(), Some("Built a counter."));
        assert!(seen[1].produced_summary);
        assert!(!seen[0].produced_summary);
    }

    #[test]
    fn never_exceeds_ceiling() {
        let model = ScriptedModel::repeating(tool_turn());
        let ws = Arc::new(FakeWorkspace::new());

        let outcome = network(3).run(&model, &ws, "go", |_| {}).expect("run");

        assert_eq!(outcome.stop, NetworkStop::MaxIterations);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(model.calls(), 3);
        assert!(outcome.state.summary.is_none());
        assert_eq!(ws.commands().len(), 3);
    }

    #[test]
    fn summary_overrides_a_router_that_never_halts() {
        struct AlwaysContinue;
        impl Router for AlwaysContinue {
            fn route(&self, _state: &NetworkState) -> Route {
                Route::Continue
            }
        }

        let model = ScriptedModel::new(vec![
            text_response("<task_summary>ok</task_summary>"),
            tool_turn(),
        ]);
        let ws = Arc::new(FakeWorkspace::new());
        let outcome = network(5)
            .with_router(AlwaysContinue)
            .run(&model, &ws, "go", |_| {})
            .expect("run");
        assert_eq!(model.calls(), 1);
        assert_eq!(outcome.stop, NetworkStop::Summary);
    }

    #[test]
    fn extra_hooks_see_the_step_result() {
        fn shout(mut result: StepResult, _state: &NetworkState) -> StepResult {
            result.summary = result.summary.map(|s| s.to_uppercase());
            result
        }

        let model = ScriptedModel::new(vec![text_response("<task_summary>done</task_summary>")]);
        let ws = Arc::new(FakeWorkspace::new());
        let outcome = network(5)
            .with_hook(shout)
            .run(&model, &ws, "go", |_| {})
            .expect("run");
        assert_eq!(outcome.state.summary.as_deref(), Some("DONE"));
    }

    #[test]
    fn model_errors_propagate() {
        let model = ScriptedModel::new(vec![Err(ModelError::Malformed {
            detail: "expected value".into(),
            body: "<html>".into(),
        })]);
        let ws = Arc::new(FakeWorkspace::new());
        let err = network(5).run(&model, &ws, "go", |_| {}).expect_err("fatal");
        assert!(matches!(err, RunError::MalformedResponse { .. }));
    }
}
