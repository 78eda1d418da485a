use std::time::Duration;

use thiserror::Error;

/// Failure classes for an external command run through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("{0}")]
    Other(String),
}

impl CommandError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Stderr (or message) text, lowercased, for sniffing auth hints.
    pub fn detail_lower(&self) -> String {
        match self {
            Self::NonZeroExit { stderr, .. } => stderr.to_lowercase(),
            other => other.to_string().to_lowercase(),
        }
    }
}

/// Cache store failures. Only surfaced to callers that ask for them;
/// discovery paths log and move on.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
