//! Extraction of the delimited task summary from agent text.

use std::sync::LazyLock;

use regex::Regex;

pub const SUMMARY_OPEN: &str = "<task_summary>";
pub const SUMMARY_CLOSE: &str = "</task_summary>";

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<task_summary>(.*?)</task_summary>").expect("summary pattern is valid")
});

/// Return the trimmed body of the last `<task_summary>` block in `text`.
///
/// Unterminated or blank blocks yield `None`.
pub fn extract_task_summary(text: &str) -> Option<String> {
    SUMMARY_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| !body.is_empty())
        .last()
        .map(str::to_string)
}
