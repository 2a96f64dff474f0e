//! Wiring of concrete collaborators for a project directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::io::config::{AppConfig, load_config};
use crate::io::model::OpenAiClient;
use crate::io::paths::AppPaths;
use crate::io::sandbox::provider_from_config;
use crate::io::store::{DirTaskStore, TaskStore};
use crate::lifecycle::TaskController;

/// A project root with its loaded config.
#[derive(Debug, Clone)]
pub struct Project {
    pub paths: AppPaths,
    /// Relative directories already resolved against the root.
    pub config: AppConfig,
}

impl Project {
    /// Load `.appforge/config.toml` under `root`, defaulting when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let paths = AppPaths::new(root);
        let config = load_config(&paths.config_path)?.resolve_dirs(&paths.root);
        Ok(Self { paths, config })
    }

    pub fn store(&self) -> Result<Arc<dyn TaskStore>> {
        let store = DirTaskStore::open(&self.config.store.dir)
            .with_context(|| format!("open task store {}", self.config.store.dir.display()))?;
        Ok(Arc::new(store))
    }

    /// Full controller. Needs the model API key in the environment.
    pub fn controller(&self) -> Result<TaskController> {
        let model = OpenAiClient::from_env(&self.config.model)?;
        TaskController::new(
            self.config.clone(),
            self.store()?,
            provider_from_config(&self.config.sandbox),
            Arc::new(model),
        )
    }
}
