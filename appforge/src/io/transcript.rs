//! Per-iteration run transcripts under `<transcript_dir>/<task_id>/`, one
//! `<attempt>-<iteration>.json` file each so retried runs keep earlier attempts.
//!
//! Transcripts are an observability artifact. They are written as the run
//! progresses and never read back by the engine.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::state::IterationRecord;

#[derive(Debug, Serialize)]
struct TranscriptEntry<'a> {
    task_id: &'a str,
    attempt: u32,
    written_at: DateTime<Utc>,
    #[serde(flatten)]
    record: &'a IterationRecord,
}

/// Writes one JSON file per iteration.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn iteration_path(&self, task_id: &str, attempt: u32, iteration: u32) -> PathBuf {
        self.dir
            .join(task_id)
            .join(format!("{attempt}-{iteration}.json"))
    }

    pub fn write(&self, task_id: &str, attempt: u32, record: &IterationRecord) -> Result<PathBuf> {
        let path = self.iteration_path(task_id, attempt, record.iteration);
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("create transcript dir {}", parent.display()))?;
        let entry = TranscriptEntry {
            task_id,
            attempt,
            written_at: Utc::now(),
            record,
        };
        let mut buf = serde_json::to_string_pretty(&entry).context("serialize transcript")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_paths_are_stable() {
        let writer = TranscriptWriter::new("/tmp/transcripts");
        assert_eq!(
            writer.iteration_path("task-1", 2, 3),
            PathBuf::from("/tmp/transcripts/task-1/2-3.json")
        );
    }

    #[test]
    fn writes_flattened_iteration_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = TranscriptWriter::new(temp.path());
        let record = IterationRecord {
            iteration: 2,
            tool_calls: vec!["write_files".into(), "verify_artifact".into()],
            produced_summary: true,
            files_written: vec!["app/page.tsx".into()],
        };
        let path = writer.write("task-9", 1, &record).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("json");
        assert_eq!(value["task_id"], "task-9");
        assert_eq!(value["attempt"], 1);
        assert_eq!(value["iteration"], 2);
        assert_eq!(value["produced_summary"], true);
        assert_eq!(value["tool_calls"][1], "verify_artifact");
    }
}
