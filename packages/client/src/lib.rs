//! Queue access for the command broker.
//!
//! This crate defines the queue capability the broker is written against
//! and provides implementations of it.
//!
//! # Features
//!
//! - `memory` (default): in-process queue for tests and local runs
//!
//! The beanstalkd client over TCP is always available.

use std::future::Future;
use std::time::Duration;

use queue_core::{JobId, JobStats, Priority, TubeName};

mod beanstalk;
mod config;
mod error;
#[cfg(feature = "memory")]
mod memory;

pub use beanstalk::BeanstalkConnection;
pub use config::{ClientConfig, DEFAULT_ADDRESS};
pub use error::QueueError;
#[cfg(feature = "memory")]
pub use memory::{MemoryQueue, PutJob, QueueCall};

/// A job handed out by `reserve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub id: JobId,
    pub body: Vec<u8>,
}

/// Operations the broker needs from a queue connection.
///
/// Implementations are single connections: calls are issued one at a time
/// and each waits for its reply.
pub trait Queue: Send {
    /// Wait up to `timeout` for a job on the watched tube.
    ///
    /// Returns [`QueueError::TimedOut`] when nothing arrived in time and
    /// [`QueueError::DeadlineSoon`] when a job already reserved by this
    /// connection is about to run out of time.
    fn reserve(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<ReservedJob, QueueError>> + Send;

    /// Remove a job permanently.
    fn delete(&mut self, id: JobId) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Return a reserved job to the ready queue after `delay`.
    fn release(
        &mut self,
        id: JobId,
        priority: Priority,
        delay: Duration,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Move a reserved job out of circulation until it is kicked.
    fn bury(
        &mut self,
        id: JobId,
        priority: Priority,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Fetch server-side statistics for a job.
    fn stats_job(&mut self, id: JobId) -> impl Future<Output = Result<JobStats, QueueError>> + Send;

    /// List every tube that currently exists on the server.
    fn list_tubes(&mut self) -> impl Future<Output = Result<Vec<TubeName>, QueueError>> + Send;
}

/// Opens queue connections.
pub trait Connect: Send + Sync + 'static {
    type Queue: Queue + 'static;

    /// Open a connection watching exactly `tube`.
    fn connect(
        &self,
        tube: &TubeName,
    ) -> impl Future<Output = Result<Self::Queue, QueueError>> + Send;
}
