//! Workspace path normalization.
//!
//! The agent is told to write with relative paths and read with absolute ones.
//! Both are folded into one canonical form, relative to the workspace root,
//! before reaching a workspace adapter.

/// Resolve `input` to a `/`-separated path relative to `root`.
///
/// Accepts either a relative path or an absolute path under `root`. Rejects
/// paths that escape the workspace or name the root itself.
pub fn workspace_relative(root: &str, input: &str) -> Result<String, String> {
    let root = root.trim_end_matches('/');
    let trimmed = input.trim();
    let rest = if trimmed.starts_with('/') {
        let stripped = trimmed
            .strip_prefix(root)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| format!("path {trimmed} is outside the workspace root {root}"))?;
        stripped.trim_start_matches('/')
    } else {
        trimmed
    };

    let mut parts = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(format!("path {trimmed} escapes the workspace")),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(format!("path {trimmed:?} does not name a file"));
    }
    Ok(parts.join("/"))
}

/// Absolute form of a workspace-relative path.
pub fn workspace_absolute(root: &str, relative: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), relative)
}
