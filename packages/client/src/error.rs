//! Queue client errors.

use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `reserve` waited for its full timeout without a job becoming available.
    #[error("reserve timed out")]
    TimedOut,
    /// A job reserved by this connection is about to exceed its TTR.
    #[error("deadline soon")]
    DeadlineSoon,
    #[error("job not found")]
    NotFound,
    /// `release` could not re-queue the job and buried it instead.
    #[error("job was buried by the server")]
    Buried,
    /// The server answered with an error reply such as OUT_OF_MEMORY.
    #[error("server error: {0}")]
    Server(String),
    /// The reply could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed by server")]
    Closed,
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Whether a reservation attempt can simply be retried.
    ///
    /// Every other error leaves the connection in a state no local retry
    /// can safely recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::TimedOut | QueueError::DeadlineSoon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_wait_conditions_are_retryable() {
        assert!(QueueError::TimedOut.is_retryable());
        assert!(QueueError::DeadlineSoon.is_retryable());
        assert!(!QueueError::NotFound.is_retryable());
        assert!(!QueueError::Closed.is_retryable());
        assert!(!QueueError::Server("OUT_OF_MEMORY".into()).is_retryable());
    }
}
