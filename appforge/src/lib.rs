//! Agent orchestration engine that turns a feature request into a generated app.
//!
//! A task is admitted under a per-client rate limit, then driven through a
//! sandboxed build loop in which a tool-calling model edits the workspace until
//! it reports a summary or hits the iteration ceiling. The result is verified
//! against the default scaffold and persisted as a terminal task record.
//!
//! - **[`core`]**: Pure, deterministic logic (rate windows, routing, status
//!   rules, placeholder detection, backoff arithmetic). No I/O.
//! - **[`io`]**: Side-effecting collaborators (config, record store, sandbox,
//!   model client). Behind traits so tests can swap them.
//! - **[`agents`]**: The tool set, one agent step, and the iterating network.
//!
//! [`lifecycle`] coordinates all of the above for one task.

pub mod agents;
pub mod bootstrap;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
