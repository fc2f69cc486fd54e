//! CLI operation plumbing.

use std::path::PathBuf;

/// Context shared by all CLI operations.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// Explicit cirrus directory, when `--dir` was given.
    pub cirrus_dir: Option<PathBuf>,
}

/// A CLI operation: parsed arguments that execute against a context.
#[async_trait::async_trait]
pub trait Op {
    type Error: std::error::Error;
    type Output: std::fmt::Display;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}
