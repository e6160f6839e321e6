//! A reserved job and the terminal actions on it.

use std::time::Duration;

use queue_client::{Queue, QueueError, ReservedJob};
use queue_core::{JobId, JobStats, Priority, TubeName};

/// A job reserved by this broker.
///
/// The queue connection is passed to each call rather than held by the job.
/// `delete`, `release` and `bury` take the job by value, so it cannot be
/// used again once its fate has been decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    tube: TubeName,
    body: Vec<u8>,
}

impl Job {
    pub fn new(reserved: ReservedJob, tube: TubeName) -> Self {
        Self {
            id: reserved.id,
            tube,
            body: reserved.body,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn tube(&self) -> &TubeName {
        &self.tube
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Current server-side statistics.
    pub async fn stats<Q: Queue>(&self, queue: &mut Q) -> Result<JobStats, QueueError> {
        queue.stats_job(self.id).await
    }

    /// Number of earlier reservations that ran out of time.
    pub async fn timeouts<Q: Queue>(&self, queue: &mut Q) -> Result<u64, QueueError> {
        Ok(self.stats(queue).await?.timeouts)
    }

    /// Remaining reservation time, in whole seconds as the server reports it.
    pub async fn time_left<Q: Queue>(&self, queue: &mut Q) -> Result<Duration, QueueError> {
        Ok(self.stats(queue).await?.time_left)
    }

    pub async fn delete<Q: Queue>(self, queue: &mut Q) -> Result<(), QueueError> {
        queue.delete(self.id).await
    }

    pub async fn release<Q: Queue>(
        self,
        queue: &mut Q,
        priority: Priority,
        delay: Duration,
    ) -> Result<(), QueueError> {
        queue.release(self.id, priority, delay).await
    }

    pub async fn bury<Q: Queue>(self, queue: &mut Q, priority: Priority) -> Result<(), QueueError> {
        queue.bury(self.id, priority).await
    }
}
