//! Run-scoped state shared by every agent step of one network run.

use serde::Serialize;

use crate::core::message::Message;
use crate::core::types::FileMap;

/// Mutable state threaded through a single network run and dropped afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkState {
    /// Files written during the run. Last write per path wins.
    pub files: FileMap,
    pub summary: Option<String>,
    pub history: Vec<Message>,
}

impl NetworkState {
    /// Fresh state whose conversation starts with `instruction`.
    pub fn seeded(instruction: &str) -> Self {
        Self {
            files: FileMap::new(),
            summary: None,
            history: vec![Message::user(instruction)],
        }
    }

    pub fn has_summary(&self) -> bool {
        self.summary
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    /// Record `summary` unless it is blank.
    pub fn set_summary(&mut self, summary: &str) {
        let trimmed = summary.trim();
        if !trimmed.is_empty() {
            self.summary = Some(trimmed.to_string());
        }
    }

    /// Replace the file map with one that includes `written`.
    pub fn merge_files(&mut self, written: FileMap) {
        let mut next = self.files.clone();
        next.extend(written);
        self.files = next;
    }
}

/// What one network iteration did, reported to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationRecord {
    /// 1-indexed.
    pub iteration: u32,
    /// Tool names in call order.
    pub tool_calls: Vec<String>,
    pub produced_summary: bool,
    pub files_written: Vec<String>,
}
