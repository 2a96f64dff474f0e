//! Task record persistence.
//!
//! The engine only needs create, lookup, update and list-recent. Status rules
//! live in [`TaskRecord::apply`]; stores call it under their own lock so a
//! read-modify-write cannot interleave with another writer.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::types::{RecordUpdate, TaskRecord};
use crate::io::config::write_atomic;

pub trait TaskStore: Send + Sync {
    /// Persist a new record. Fails if the id is taken.
    fn create(&self, record: &TaskRecord) -> Result<()>;

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// Lookup by the dispatch event id handed back at admission.
    fn find_by_event_id(&self, event_id: &str) -> Result<Option<TaskRecord>>;

    /// Apply `update` to the stored record and return the new version.
    fn update(&self, id: &str, update: RecordUpdate) -> Result<TaskRecord>;

    /// Newest first, at most `limit` records.
    fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>>;
}

fn newest_first(mut records: Vec<TaskRecord>, limit: usize) -> Vec<TaskRecord> {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    records.truncate(limit);
    records
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn create(&self, record: &TaskRecord) -> Result<()> {
        let mut records = lock(&self.records);
        if records.contains_key(&record.id) {
            return Err(anyhow!("task {} already exists", record.id));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn find_by_event_id(&self, event_id: &str) -> Result<Option<TaskRecord>> {
        Ok(lock(&self.records)
            .values()
            .find(|record| record.event_id == event_id)
            .cloned())
    }

    fn update(&self, id: &str, update: RecordUpdate) -> Result<TaskRecord> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        record.apply(update, Utc::now())?;
        Ok(record.clone())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let all = lock(&self.records).values().cloned().collect();
        Ok(newest_first(all, limit))
    }
}

/// One pretty-printed JSON file per record, replaced atomically on write.
#[derive(Debug)]
pub struct DirTaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DirTaskStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create store dir {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(anyhow!("invalid task id {id:?}"));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn write(&self, record: &TaskRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        let mut buf = serde_json::to_string_pretty(record).context("serialize task record")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let mut records = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("read dir {}", self.dir.display()))?;
        for entry in entries {
            let path = entry.context("read dir entry")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            records.push(read_record(&path)?);
        }
        Ok(records)
    }
}

fn read_record(path: &Path) -> Result<TaskRecord> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

impl TaskStore for DirTaskStore {
    #[instrument(skip_all, fields(task = %record.id))]
    fn create(&self, record: &TaskRecord) -> Result<()> {
        let _guard = lock(&self.write_lock);
        if self.record_path(&record.id)?.exists() {
            return Err(anyhow!("task {} already exists", record.id));
        }
        self.write(record)?;
        debug!("task record created");
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>> {
        let path = self.record_path(id)?;
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .with_context(|| format!("parse {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    fn find_by_event_id(&self, event_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|record| record.event_id == event_id))
    }

    #[instrument(skip_all, fields(task = %id))]
    fn update(&self, id: &str, update: RecordUpdate) -> Result<TaskRecord> {
        let _guard = lock(&self.write_lock);
        let mut record = self
            .find_by_id(id)?
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        record.apply(update, Utc::now())?;
        self.write(&record)?;
        debug!(status = %record.status, "task record updated");
        Ok(record)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        Ok(newest_first(self.load_all()?, limit))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::types::TaskStatus;

    fn record_at(id: &str, minute: u32) -> TaskRecord {
        let at = Utc
            .with_ymd_and_hms(2025, 1, 1, 12, minute, 0)
            .single()
            .expect("valid time");
        TaskRecord::pending(id, format!("evt-{id}"), "prompt", at)
    }

    fn exercise(store: &dyn TaskStore) {
        for (idx, id) in ["a", "b", "c"].iter().enumerate() {
            store.create(&record_at(id, idx as u32)).expect("create");
        }
        assert!(store.create(&record_at("a", 9)).is_err(), "duplicate id");

        let found = store.find_by_event_id("evt-b").expect("find").expect("present");
        assert_eq!(found.id, "b");
        assert!(store.find_by_id("zzz").expect("find").is_none());

        let recent = store.list_recent(2).expect("list");
        let ids: Vec<&str> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);

        let failed = store
            .update(
                "a",
                RecordUpdate::Fail {
                    message: "sandbox unavailable".into(),
                },
            )
            .expect("fail");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.updated_at > failed.created_at);

        let err = store
            .update("a", RecordUpdate::Note("retrying".into()))
            .expect_err("terminal");
        assert!(err.to_string().contains("already failed"));
        let reread = store.find_by_id("a").expect("find").expect("present");
        assert_eq!(reread.summary.as_deref(), Some("sandbox unavailable"));
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryTaskStore::new());
    }

    #[test]
    fn dir_store_contract() {
        let temp = tempfile::tempdir().expect("tempdir");
        exercise(&DirTaskStore::open(temp.path().join("tasks")).expect("open"));
    }

    #[test]
    fn dir_store_rejects_path_like_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DirTaskStore::open(temp.path()).expect("open");
        assert!(store.find_by_id("../etc/passwd").is_err());
    }

    #[test]
    fn dir_store_survives_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("tasks");
        DirTaskStore::open(&dir)
            .expect("open")
            .create(&record_at("r1", 0))
            .expect("create");
        let reopened = DirTaskStore::open(&dir).expect("reopen");
        assert!(reopened.find_by_id("r1").expect("find").is_some());
    }
}
