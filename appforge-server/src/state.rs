//! Shared application state for the API server.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use appforge::lifecycle::TaskController;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<TaskController>,
    /// Record ids with a run currently on the blocking pool.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(controller: TaskController) -> Self {
        Self {
            controller: Arc::new(controller),
            in_flight: Arc::default(),
        }
    }

    /// Run controller work that touches the store off the async workers.
    pub async fn blocking<T, F>(&self, work: F) -> Result<T, JoinError>
    where
        T: Send + 'static,
        F: FnOnce(&TaskController) -> T + Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        tokio::task::spawn_blocking(move || work(&controller)).await
    }

    /// Run an admitted task on the blocking pool without waiting for it.
    ///
    /// Returns `None` when a run for `record_id` is already in flight, so a
    /// re-delivered admission does not start a second run. Task failures land
    /// in the record; only store errors reach the log here.
    pub fn dispatch(&self, record_id: String) -> Option<JoinHandle<()>> {
        if !self.claim(&record_id) {
            debug!(record = %record_id, "run already in flight; not dispatching");
            return None;
        }
        let controller = Arc::clone(&self.controller);
        let in_flight = Arc::clone(&self.in_flight);
        Some(tokio::task::spawn_blocking(move || {
            match controller.run(&record_id) {
                Ok(outcome) => info!(
                    record = %record_id,
                    status = %outcome.record.status,
                    "task run finished"
                ),
                Err(err) => error!(record = %record_id, error = %err, "task run aborted"),
            }
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&record_id);
        }))
    }

    fn claim(&self, record_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record_id.to_string())
    }
}
