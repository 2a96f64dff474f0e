//! Side-effecting collaborators: config, storage, sandbox and model clients.

pub mod config;
pub mod model;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod store;
pub mod transcript;
