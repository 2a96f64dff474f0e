//! Canonical `.appforge/` layout and project initialization.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{AppConfig, write_config};

const GITIGNORE: &str = "tasks/\nsandboxes/\ntranscripts/\n";

/// All canonical paths within `.appforge/` for a project root.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub app_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let app_dir = root.join(".appforge");
        Self {
            root,
            config_path: app_dir.join("config.toml"),
            gitignore_path: app_dir.join(".gitignore"),
            app_dir,
        }
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone, Copy)]
pub struct InitOptions {
    /// Overwrite an existing config.
    pub force: bool,
}

/// Create `.appforge/` with a default config.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: InitOptions) -> Result<AppPaths> {
    let paths = AppPaths::new(root);
    if paths.app_dir.exists() && !paths.app_dir.is_dir() {
        return Err(anyhow!("appforge init: .appforge exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "appforge init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.app_dir)
        .with_context(|| format!("create {}", paths.app_dir.display()))?;
    fs::write(&paths.gitignore_path, GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &AppConfig::default())?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_writes_loadable_default_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), InitOptions { force: false }).expect("init");
        assert!(paths.gitignore_path.is_file());
        let cfg = load_config(&paths.config_path).expect("load");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn init_refuses_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), InitOptions { force: false }).expect("first init");
        let err = init_project(temp.path(), InitOptions { force: false }).expect_err("second");
        assert!(err.to_string().contains("--force"));
        init_project(temp.path(), InitOptions { force: true }).expect("forced init");
    }
}
