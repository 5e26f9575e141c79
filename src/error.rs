//! Error types for gan-audit-core.

use thiserror::Error;

/// Result type alias using gan-audit-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving an audit.
///
/// Only a small subset of these ever crosses the public `audit` boundary
/// (`InvalidThought`, `QueueFull`, `SessionLocked`); everything downstream of
/// queue admission degrades into a warning or a fallback review instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Thought failed input validation
    #[error("Invalid thought: {0}")]
    InvalidThought(String),

    /// Queue admission rejected the job
    #[error("Audit queue is full ({pending} pending, max {max})")]
    QueueFull { pending: usize, max: usize },

    /// The queue was destroyed while the job was pending or running
    #[error("Audit queue was destroyed")]
    QueueDestroyed,

    /// A job exceeded its per-job deadline
    #[error("Audit job timed out after {timeout_ms}ms")]
    JobTimeout { timeout_ms: u64 },

    /// The judge failed to produce a review
    #[error("Judge error: {0}")]
    Judge(String),

    /// Context pack construction failed
    #[error("Context builder error: {0}")]
    Context(String),

    /// Session journal I/O failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The session is complete; no further thoughts are accepted
    #[error("Session {0} is complete and locked")]
    SessionLocked(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A structured-output sub-generator exceeded its deadline
    #[error("Output component '{component}' timed out after {timeout_ms}ms")]
    ComponentTimeout { component: String, timeout_ms: u64 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid-thought error.
    pub fn invalid_thought(message: impl Into<String>) -> Self {
        Self::InvalidThought(message.into())
    }

    /// Create a judge error.
    pub fn judge(message: impl Into<String>) -> Self {
        Self::Judge(message.into())
    }

    /// Create a context error.
    pub fn context(message: impl Into<String>) -> Self {
        Self::Context(message.into())
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a job timeout error.
    pub fn job_timeout(timeout_ms: u64) -> Self {
        Self::JobTimeout { timeout_ms }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error should count against a job's retry budget.
    ///
    /// Admission and lifecycle errors are terminal; only work failures
    /// (timeout, judge crash) are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::JobTimeout { .. } | Self::Judge(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::job_timeout(1000).is_retryable());
        assert!(Error::judge("crashed").is_retryable());
        assert!(!Error::QueueDestroyed.is_retryable());
        assert!(!Error::invalid_thought("bad").is_retryable());
        assert!(!Error::SessionLocked("s1".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::QueueFull {
            pending: 50,
            max: 50,
        };
        assert!(err.to_string().contains("50 pending"));

        let err = Error::job_timeout(30_000);
        assert!(err.to_string().contains("30000ms"));
    }
}
