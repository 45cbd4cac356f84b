//! Script-execution capability.
//!
//! Everything that touches a browser goes through these traits: open a
//! session, navigate it, evaluate JavaScript in the page, close it. One
//! session belongs to exactly one request and is never shared.

pub mod chromium;
#[cfg(test)]
pub(crate) mod fake;

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

/// Evaluation failure, split by whether the session is still usable
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    /// The page, tab or browser connection is gone
    #[error("execution environment lost: {0}")]
    EnvironmentLost(String),

    /// The script itself threw or could not be evaluated
    #[error("script error: {0}")]
    Script(String),
}

impl ExecError {
    pub fn is_environment_lost(&self) -> bool {
        matches!(self, ExecError::EnvironmentLost(_))
    }
}

impl From<ExecError> for AppError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::EnvironmentLost(msg) => AppError::EnvironmentLost(msg),
            ExecError::Script(msg) => {
                AppError::Internal(anyhow::anyhow!("script evaluation failed: {}", msg))
            }
        }
    }
}

/// A live page in a script-execution environment
#[async_trait]
pub trait ExecutionSession: Send + Sync {
    /// Load a URL in the page
    async fn navigate(&mut self, url: &str) -> Result<(), ExecError>;

    /// Evaluate a script, awaiting a returned promise, and return its value
    /// as JSON (`undefined` reads as `null`)
    async fn evaluate(&self, script: &str) -> Result<Value, ExecError>;

    /// Tear the session down, releasing the page and its process
    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Creates fresh, isolated execution sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(&self) -> anyhow::Result<Box<dyn ExecutionSession>>;
}

/// Close a session, logging instead of returning teardown failures so they
/// never mask the outcome of the work done on it
pub async fn close_session(session: Box<dyn ExecutionSession>, purpose: &str) {
    if let Err(e) = session.close().await {
        warn!(purpose = %purpose, error = ?e, "Session teardown failed");
    }
}
