//! Deterministic, pure logic shared by the task engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod error;
pub mod message;
pub mod path;
pub mod phase;
pub mod placeholder;
pub mod rate_limit;
pub mod router;
pub mod state;
pub mod summary;
pub mod types;
