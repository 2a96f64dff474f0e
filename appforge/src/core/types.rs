//! Task record types and the status rules they obey.
//!
//! A record is created `pending` and moves exactly once, to `completed` or
//! `failed`. Every mutation goes through [`TaskRecord::apply`] so the rule is
//! enforced in one place regardless of which store backs the record.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generated files keyed by workspace-relative path.
///
/// A `BTreeMap` keeps serialized records stable; callers must not rely on order.
pub type FileMap = BTreeMap<String, String>;

/// Persisted task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    /// Only `pending -> completed` and `pending -> failed` are legal.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Completed) | (TaskStatus::Pending, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the primary-artifact check, persisted for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub reason: String,
}

/// One task as seen by pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    /// Identifier of the dispatch event that drives the run.
    pub event_id: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub url: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub files: Option<FileMap>,
    pub verification: Option<VerificationReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal payload written when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub url: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub files: FileMap,
    pub verification: VerificationReport,
}

/// The only mutations a record accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordUpdate {
    /// Replace the visible summary of a pending task (e.g. a retry note).
    Note(String),
    Complete(Completion),
    Fail { message: String },
}

impl RecordUpdate {
    fn label(&self) -> &'static str {
        match self {
            RecordUpdate::Note(_) => "note",
            RecordUpdate::Complete(_) => "complete",
            RecordUpdate::Fail { .. } => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task {id} is already {status}; refusing {update}")]
    Terminal {
        id: String,
        status: TaskStatus,
        update: &'static str,
    },
}

impl TaskRecord {
    pub fn pending(
        id: impl Into<String>,
        event_id: impl Into<String>,
        prompt: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            event_id: event_id.into(),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            url: None,
            title: None,
            summary: None,
            files: None,
            verification: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `update`, rejecting anything that would touch a terminal record.
    pub fn apply(&mut self, update: RecordUpdate, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                id: self.id.clone(),
                status: self.status,
                update: update.label(),
            });
        }
        match update {
            RecordUpdate::Note(note) => {
                self.summary = Some(note);
            }
            RecordUpdate::Complete(done) => {
                self.status = TaskStatus::Completed;
                self.url = done.url;
                self.title = Some(done.title);
                self.summary = done.summary;
                self.files = Some(done.files);
                self.verification = Some(done.verification);
            }
            RecordUpdate::Fail { message } => {
                self.status = TaskStatus::Failed;
                self.summary = Some(message);
            }
        }
        self.updated_at = now;
        Ok(())
    }
}
