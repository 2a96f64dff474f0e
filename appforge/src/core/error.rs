//! Error taxonomy for admission and task runs.
//!
//! Tool failures and verification mismatches never appear here: they are
//! absorbed into the conversation or the completed record. Everything in
//! [`RunError`] ends the task as `failed`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Rejections surfaced to the caller before any run is dispatched.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("rate limit exceeded for client '{client_id}'; wait before creating another task")]
    RateLimited { client_id: String },
    #[error("task store error: {0}")]
    Store(String),
}

/// Failures that terminate a task run.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// The sandbox could not be provisioned or stopped answering.
    #[error("sandbox unavailable: {0}")]
    Provisioning(String),
    /// Upstream throttling; the only retryable class.
    #[error("model provider throttled the request: {0}")]
    Throttled(String),
    /// The inference response body could not be parsed.
    #[error("failed to parse model response: {detail}")]
    MalformedResponse { detail: String, body: String },
    #[error("model request failed: {0}")]
    Model(String),
    #[error("task store error: {0}")]
    Store(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<RunError> },
}

impl RunError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RunError::Throttled(_))
    }
}

static THROTTLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests|throttl")
        .expect("throttle pattern is valid")
});

/// Whether an upstream error message describes throttling.
pub fn looks_throttled(message: &str) -> bool {
    THROTTLE_RE.is_match(message)
}
