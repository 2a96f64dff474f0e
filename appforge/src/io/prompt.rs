//! System prompt rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::summary::{SUMMARY_CLOSE, SUMMARY_OPEN};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Commands that would fight the already-running dev server.
pub const FORBIDDEN_COMMANDS: &[&str] = &[
    "npm run dev",
    "npm run build",
    "npm run start",
    "next dev",
    "next build",
    "next start",
];

/// Render the agent's system instructions.
pub fn render_system_prompt(primary_path: &str, root: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .context("parse system prompt template")?;
    let rendered = env
        .get_template("system")?
        .render(context! {
            primary_path => primary_path,
            root => root.trim_end_matches('/'),
            forbidden_commands => FORBIDDEN_COMMANDS,
            summary_open => SUMMARY_OPEN,
            summary_close => SUMMARY_CLOSE,
        })
        .context("render system prompt")?;
    Ok(rendered)
}
