//! Engine-wide error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while driving a browser context.
///
/// Shared by the pool, the parser and the executor so that task records can
/// carry a uniform [`ErrorKind`] regardless of which component failed.
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    /// No context became available within the acquisition timeout.
    #[error("context pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// Navigation did not settle within its timeout.
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    /// Target element could not be located.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// Target element disappeared between lookup and use.
    #[error("element stale: {selector}")]
    ElementStale { selector: String },

    /// A precondition or post-step validation did not hold.
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// A plan step exceeded its per-step deadline.
    #[error("{action} step timed out after {timeout_ms}ms")]
    StepTimeout { action: String, timeout_ms: u64 },

    /// Network-level failure (connection refused, DNS, reset mid-load).
    #[error("network error: {0}")]
    Network(String),

    /// Browser protocol failure (malformed response, closed session).
    #[error("browser protocol error: {0}")]
    Protocol(String),

    /// Cooperative cancellation was observed at a phase/step boundary.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected internal failure; aborts the task immediately.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AutomationError {
    /// The serializable classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AutomationError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            AutomationError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            AutomationError::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            AutomationError::ElementStale { .. } => ErrorKind::ElementStale,
            AutomationError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            AutomationError::StepTimeout { .. } => ErrorKind::StepTimeout,
            AutomationError::Network(_) => ErrorKind::NetworkError,
            AutomationError::Protocol(_) => ErrorKind::ProtocolError,
            AutomationError::Cancelled => ErrorKind::Cancelled,
            AutomationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the whole task may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AutomationError::PoolExhausted { .. }
                | AutomationError::Network(_)
                | AutomationError::ElementStale { .. }
                | AutomationError::NavigationTimeout { .. }
                | AutomationError::StepTimeout { .. }
        )
    }
}

/// Serializable error classification carried on failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PoolExhausted,
    NavigationTimeout,
    ElementNotFound,
    ElementStale,
    ValidationFailed,
    StepTimeout,
    NetworkError,
    ProtocolError,
    Cancelled,
    Internal,
}

/// Structured failure details attached to a task in the `Failed` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Ordinal (1-based) of the failing plan step, for execute tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
}

impl ErrorDetails {
    /// Build details from an automation error.
    pub fn from_error(err: &AutomationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            step_index: None,
        }
    }

    /// Attach the failing step ordinal.
    pub fn with_step_index(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }
}
