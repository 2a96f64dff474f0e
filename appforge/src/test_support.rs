//! Scripted collaborators for driving the engine in tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::message::ToolCallRequest;
use crate::core::rate_limit::Clock;
use crate::io::config::AppConfig;
use crate::io::model::{ModelClient, ModelError, ModelRequest, ModelResponse};
use crate::io::sandbox::{CommandResult, SandboxError, SandboxProvider, Workspace};
use crate::io::store::MemoryTaskStore;
use crate::lifecycle::TaskController;
use crate::retry::Sleeper;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test mutex poisoned")
}

static CALL_IDS: AtomicUsize = AtomicUsize::new(0);

/// A tool call with a unique id.
pub fn tool_call(name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: format!("call_{}", CALL_IDS.fetch_add(1, Ordering::Relaxed)),
        name: name.to_string(),
        arguments,
    }
}

/// A plain-text model reply with no tool calls.
pub fn text_response(text: &str) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
    })
}

/// Model that replays a fixed script of responses.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    repeat: Option<Result<ModelResponse, ModelError>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Answers every call with `response`.
    pub fn repeating(response: Result<ModelResponse, ModelError>) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    /// Replays `script`, then answers every further call with `then`.
    pub fn then_repeating(
        script: Vec<Result<ModelResponse, ModelError>>,
        then: Result<ModelResponse, ModelError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: Some(then),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, _request: &ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = lock(&self.script).pop_front() {
            return next;
        }
        self.repeat
            .clone()
            .unwrap_or_else(|| Err(ModelError::Request("model script exhausted".to_string())))
    }
}

#[derive(Debug, Default)]
struct FakeWorkspaceState {
    files: BTreeMap<String, String>,
    write_log: Vec<String>,
    commands: Vec<String>,
    failing_writes: HashSet<String>,
    command_error: Option<SandboxError>,
    read_error: Option<SandboxError>,
}

/// In-memory workspace that records every operation.
#[derive(Debug, Default)]
pub struct FakeWorkspace {
    state: Mutex<FakeWorkspaceState>,
}

impl FakeWorkspace {
    pub const ID: &'static str = "fake-sandbox";
    pub const ADDRESS: &'static str = "https://3000-fake-sandbox.test";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, path: &str, content: &str) {
        lock(&self.state)
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Paths passed to `write_file`, in call order.
    pub fn write_log(&self) -> Vec<String> {
        lock(&self.state).write_log.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn fail_writes_to(&self, path: &str) {
        lock(&self.state).failing_writes.insert(path.to_string());
    }

    pub fn fail_commands_with(&self, err: SandboxError) {
        lock(&self.state).command_error = Some(err);
    }

    pub fn fail_reads_with(&self, err: SandboxError) {
        lock(&self.state).read_error = Some(err);
    }
}

impl Workspace for FakeWorkspace {
    fn id(&self) -> &str {
        Self::ID
    }

    fn address(&self) -> &str {
        Self::ADDRESS
    }

    fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError> {
        let mut state = lock(&self.state);
        state.commands.push(command.to_string());
        if let Some(err) = &state.command_error {
            return Err(err.clone());
        }
        Ok(CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let mut state = lock(&self.state);
        state.write_log.push(path.to_string());
        if state.failing_writes.contains(path) {
            return Err(SandboxError::operation(format!(
                "write {path}: permission denied"
            )));
        }
        state.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let state = lock(&self.state);
        if let Some(err) = &state.read_error {
            return Err(err.clone());
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::operation(format!("no such file: {path}")))
    }
}

/// Hands out one shared [`FakeWorkspace`], or fails every provision.
#[derive(Debug)]
pub struct FakeSandboxProvider {
    workspace: Arc<FakeWorkspace>,
    failure: Option<SandboxError>,
    provisions: AtomicUsize,
}

impl FakeSandboxProvider {
    pub fn new(workspace: Arc<FakeWorkspace>) -> Self {
        Self {
            workspace,
            failure: None,
            provisions: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: SandboxError) -> Self {
        Self {
            failure: Some(err),
            ..Self::new(Arc::new(FakeWorkspace::new()))
        }
    }

    pub fn workspace(&self) -> &Arc<FakeWorkspace> {
        &self.workspace
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }
}

impl SandboxProvider for FakeSandboxProvider {
    fn provision(&self) -> Result<Box<dyn Workspace>, SandboxError> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(Box::new(Arc::clone(&self.workspace)))
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *lock(&self.offset) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *lock(&self.offset)
    }
}

/// Records requested sleeps instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}

/// Defaults with a small iteration ceiling.
pub fn test_config() -> AppConfig {
    AppConfig {
        max_iterations: 5,
        ..AppConfig::default()
    }
}

/// A controller wired to in-memory collaborators.
pub struct Harness {
    pub controller: TaskController,
    pub store: Arc<MemoryTaskStore>,
    pub provider: Arc<FakeSandboxProvider>,
    pub model: Arc<ScriptedModel>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    pub fn new(config: AppConfig, model: ScriptedModel, provider: FakeSandboxProvider) -> Self {
        let store = Arc::new(MemoryTaskStore::new());
        let provider = Arc::new(provider);
        let model = Arc::new(model);
        let sleeper = Arc::new(RecordingSleeper::default());
        let controller = TaskController::new(
            config,
            store.clone(),
            provider.clone(),
            model.clone(),
        )
        .expect("controller")
        .with_sleeper(sleeper.clone());
        Self {
            controller,
            store,
            provider,
            model,
            sleeper,
        }
    }

    /// Harness over a fresh [`FakeWorkspace`].
    pub fn with_model(model: ScriptedModel) -> Self {
        Self::new(
            test_config(),
            model,
            FakeSandboxProvider::new(Arc::new(FakeWorkspace::new())),
        )
    }

    pub fn workspace(&self) -> &Arc<FakeWorkspace> {
        self.provider.workspace()
    }
}
