//! Errors that stop a broker.

use queue_client::QueueError;
use queue_core::JobId;
use thiserror::Error;

/// Conditions the broker cannot continue past.
///
/// These are returned from [`crate::Broker::run`] for the caller to decide
/// on restart policy; the broker never exits the process itself.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect: {0}")]
    Connect(#[source] QueueError),
    #[error("reserve failed: {0}")]
    Reserve(#[source] QueueError),
    #[error("failed to read stats for job {job_id}: {source}")]
    Stats {
        job_id: JobId,
        #[source]
        source: QueueError,
    },
    #[error("failed to {action} job {job_id}: {source}")]
    Dispatch {
        job_id: JobId,
        action: &'static str,
        #[source]
        source: QueueError,
    },
}
