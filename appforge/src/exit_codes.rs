//! Stable exit codes for `appforge` CLI commands.

/// Command succeeded; for `run`, the task completed.
pub const OK: i32 = 0;
/// Invalid input, config, or any other error.
pub const INVALID: i32 = 1;
/// `appforge run` was rejected by the rate limit.
pub const RATE_LIMITED: i32 = 2;
/// `appforge run` finished with the task marked failed.
pub const TASK_FAILED: i32 = 3;
