//! The coding agent, its tools, and the network that iterates it.

pub mod network;
pub mod step;
pub mod tools;

pub use network::{Network, NetworkOutcome, NetworkStop, PostStepHook, summary_hook};
pub use step::{CodeAgent, StepResult};
pub use tools::{ToolInvocation, ToolOutcome, ToolSet};
