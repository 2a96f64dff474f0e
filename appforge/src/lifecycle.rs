//! Task lifecycle: admission, then one run from sandbox to terminal record.
//!
//! Admission is cheap and never touches the sandbox or the model. It creates
//! the `pending` record that callers poll. [`TaskController::run`] does the
//! heavy lifting and always leaves the record `completed` or `failed`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::agents::{CodeAgent, Network, NetworkOutcome};
use crate::core::error::{AdmissionError, RunError};
use crate::core::phase::{Phase, PhaseTrail};
use crate::core::placeholder::ArtifactCheck;
use crate::core::rate_limit::RateGate;
use crate::core::state::IterationRecord;
use crate::core::types::{Completion, RecordUpdate, TaskRecord};
use crate::io::config::AppConfig;
use crate::io::model::ModelClient;
use crate::io::sandbox::{SandboxError, SandboxProvider, Workspace};
use crate::io::store::TaskStore;
use crate::io::transcript::TranscriptWriter;
use crate::retry::{RetryNotice, Sleeper, ThreadSleeper, with_retry};

const TITLE_EXCERPT_CHARS: usize = 60;

/// Inbound request to create a task.
#[derive(Debug, Clone, Default)]
pub struct AdmissionRequest {
    pub prompt: String,
    /// Reuse this record if it already exists.
    pub record_id: Option<String>,
    /// Rate-limit identity; the configured default when absent.
    pub client_id: Option<String>,
}

/// Handles returned to the caller for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub record_id: String,
    pub event_id: String,
    /// The record already existed and was not recreated.
    #[serde(skip)]
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: TaskRecord,
    /// Phases this invocation visited. Empty when the record was already terminal.
    pub phases: Vec<Phase>,
}

pub struct TaskController {
    config: AppConfig,
    gate: Arc<RateGate>,
    store: Arc<dyn TaskStore>,
    sandboxes: Arc<dyn SandboxProvider>,
    model: Arc<dyn ModelClient>,
    sleeper: Arc<dyn Sleeper>,
    network: Network,
    transcripts: Option<TranscriptWriter>,
}

impl TaskController {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn TaskStore>,
        sandboxes: Arc<dyn SandboxProvider>,
        model: Arc<dyn ModelClient>,
    ) -> Result<Self> {
        config.validate()?;
        let network = Network::new(CodeAgent::from_config(&config)?, config.max_iterations);
        let transcripts = config.transcript_dir.as_deref().map(TranscriptWriter::new);
        Ok(Self {
            config,
            gate: Arc::new(RateGate::new()),
            store,
            sandboxes,
            model,
            sleeper: Arc::new(ThreadSleeper),
            network,
            transcripts,
        })
    }

    pub fn with_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client_id_or_default<'a>(&'a self, client_id: Option<&'a str>) -> &'a str {
        client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.config.rate_limit.default_client_id)
    }

    /// Requests `client_id` may still make in its current window.
    pub fn remaining(&self, client_id: &str) -> u32 {
        self.gate
            .remaining(client_id, self.config.rate_limit.max_requests)
    }

    /// Rate-check, then create (or reuse) the pending record.
    #[instrument(skip_all, fields(record_id = request.record_id.as_deref()))]
    pub fn admit(&self, request: &AdmissionRequest) -> Result<Admission, AdmissionError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(AdmissionError::Invalid("prompt must not be empty".to_string()));
        }
        if let Some(id) = request.record_id.as_deref()
            && id.trim().is_empty()
        {
            return Err(AdmissionError::Invalid("record id must not be blank".to_string()));
        }

        let client_id = self.client_id_or_default(request.client_id.as_deref());
        let limits = &self.config.rate_limit;
        if !self
            .gate
            .admit(client_id, limits.max_requests, self.config.rate_window())
        {
            warn!(client_id, "admission rejected by rate limit");
            return Err(AdmissionError::RateLimited {
                client_id: client_id.to_string(),
            });
        }

        let store_err = |err: anyhow::Error| AdmissionError::Store(format!("{err:#}"));
        if let Some(id) = request.record_id.as_deref()
            && let Some(existing) = self.store.find_by_id(id).map_err(store_err)?
        {
            info!(record = %existing.id, "reusing existing task record");
            return Ok(Admission {
                record_id: existing.id,
                event_id: existing.event_id,
                reused: true,
            });
        }

        let record_id = request
            .record_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let event_id = Uuid::new_v4().to_string();
        let record = TaskRecord::pending(&record_id, &event_id, prompt, Utc::now());
        self.store.create(&record).map_err(store_err)?;
        info!(record = %record_id, event = %event_id, "task admitted");
        Ok(Admission {
            record_id,
            event_id,
            reused: false,
        })
    }

    /// Drive one task to a terminal record.
    ///
    /// Task failures are recorded and returned as `Ok` with a `failed`
    /// record. `Err` means the store could not be read or written.
    #[instrument(skip_all, fields(record = %record_id))]
    pub fn run(&self, record_id: &str) -> Result<RunOutcome, RunError> {
        let record = self
            .store
            .find_by_id(record_id)
            .map_err(|err| RunError::Store(format!("{err:#}")))?
            .ok_or_else(|| RunError::Store(format!("task {record_id} not found")))?;
        if record.status.is_terminal() {
            info!(status = %record.status, "task already finished; nothing to do");
            return Ok(RunOutcome {
                record,
                phases: Vec::new(),
            });
        }

        let mut trail = PhaseTrail::default();
        info!(phase = %Phase::Created, "task phase");
        let update = match self.drive(&record, &mut trail) {
            Ok(completion) => {
                self.enter(&mut trail, Phase::Completed);
                RecordUpdate::Complete(completion)
            }
            Err(err) => {
                if let RunError::MalformedResponse { body, .. } = &err {
                    error!(body = %body, "raw model response");
                }
                error!(error = %err, phase = %trail.current(), "task failed");
                self.enter(&mut trail, Phase::Failed);
                RecordUpdate::Fail {
                    message: err.to_string(),
                }
            }
        };

        let record = self
            .store
            .update(record_id, update)
            .map_err(|err| RunError::Store(format!("{err:#}")))?;
        Ok(RunOutcome {
            record,
            phases: trail.phases().to_vec(),
        })
    }

    fn drive(&self, record: &TaskRecord, trail: &mut PhaseTrail) -> Result<Completion, RunError> {
        let workspace = self.sandboxes.provision().map_err(provisioning)?;
        self.enter(trail, Phase::SandboxReady);

        self.enter(trail, Phase::Running);
        let outcome = with_retry(
            &self.config.backoff(),
            self.sleeper.as_ref(),
            |notice| self.note_retry(&record.id, notice),
            |attempt| {
                self.network.run(
                    self.model.as_ref(),
                    workspace.as_ref(),
                    &record.prompt,
                    |iteration| self.write_transcript(&record.id, attempt, iteration),
                )
            },
        )?;

        self.enter(trail, Phase::Verifying);
        let check = self
            .network
            .agent()
            .tools()
            .verify_artifact(workspace.as_ref())?;
        Ok(completion(&record.prompt, workspace.as_ref(), outcome, &check))
    }

    fn enter(&self, trail: &mut PhaseTrail, phase: Phase) {
        if trail.advance(phase) {
            info!(phase = %phase, "task phase");
        } else {
            warn!(from = %trail.current(), to = %phase, "ignored illegal phase transition");
        }
    }

    fn note_retry(&self, record_id: &str, notice: &RetryNotice<'_>) {
        if let Err(err) = self.store.update(record_id, RecordUpdate::Note(notice.note())) {
            warn!(error = %err, "could not record retry note");
        }
    }

    fn write_transcript(&self, record_id: &str, attempt: u32, iteration: &IterationRecord) {
        if let Some(writer) = &self.transcripts
            && let Err(err) = writer.write(record_id, attempt, iteration)
        {
            warn!(error = %err, "could not write transcript");
        }
    }

    pub fn find_by_event_id(&self, event_id: &str) -> Result<Option<TaskRecord>> {
        self.store.find_by_event_id(event_id)
    }

    /// Newest first. `limit` defaults to, and is capped at, `store.list_limit`.
    pub fn recent(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>> {
        let cap = self.config.store.list_limit;
        self.store
            .list_recent(limit.unwrap_or(cap).clamp(1, cap))
    }
}

fn provisioning(err: SandboxError) -> RunError {
    match err {
        SandboxError::Unavailable(message) => RunError::Provisioning(message),
        SandboxError::Operation { message, .. } => RunError::Provisioning(message),
    }
}

fn completion(
    prompt: &str,
    workspace: &dyn Workspace,
    outcome: NetworkOutcome,
    check: &ArtifactCheck,
) -> Completion {
    let excerpt = title_excerpt(prompt);
    let title = if check.verified {
        format!("App: {excerpt}")
    } else {
        format!("⚠️ Default Page (unverified): {excerpt}")
    };

    let mut summary = outcome.state.summary.clone().unwrap_or_else(|| {
        format!(
            "No task summary produced (stopped after {} iterations).",
            outcome.iterations
        )
    });
    if !check.verified {
        summary.push_str(&format!("\n\nVerification: {}", check.reason));
    }

    Completion {
        url: Some(workspace.address().to_string()),
        title,
        summary: Some(summary),
        files: outcome.state.files,
        verification: check.report(),
    }
}

fn title_excerpt(prompt: &str) -> String {
    let line = prompt.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let mut excerpt: String = line.chars().take(TITLE_EXCERPT_CHARS).collect();
    if line.chars().count() > TITLE_EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_uses_first_line_and_truncates() {
        assert_eq!(title_excerpt("\n  build a counter app \nwith buttons"), "build a counter app");
        let long = "x".repeat(80);
        let excerpt = title_excerpt(&long);
        assert_eq!(excerpt.len(), TITLE_EXCERPT_CHARS + 3);
        assert!(excerpt.ends_with("..."));
    }

    #[test]
    fn provisioning_errors_keep_their_message() {
        let err = provisioning(SandboxError::Unavailable("quota exceeded".into()));
        assert_eq!(err.to_string(), "sandbox unavailable: quota exceeded");
    }
}
