//! Sandbox client - RPC wrapper around the external execution service
//!
//! This module only moves commands and results over the wire.
//! It does NOT:
//! - Interpret verdicts (that's the judge's job)
//! - Know about languages or test cases

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::SandboxError;

pub use client::HttpSandbox;
pub use types::{Cmd, RunResult, SandboxStatus};

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute commands in one request; results come back in command order
    async fn run(&self, cmds: &[Cmd]) -> Result<Vec<RunResult>, SandboxError>;

    /// Delete an artifact cached by an earlier `copyOutCached`
    async fn delete_file(&self, file_id: &str) -> Result<(), SandboxError>;
}
