//! The reserve / execute / dispatch loop.

use queue_client::{Queue, QueueError};
use queue_core::{Disposition, JobResult, LeaveReason, Priority};
use tokio::sync::mpsc;
use tracing::{Instrument, Span};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::executor::Executor;
use crate::job::Job;

/// Reserves jobs from one tube and runs the command for each, one at a time.
pub struct Broker<Q: Queue> {
    queue: Q,
    config: BrokerConfig,
    executor: Executor,
    results: Option<mpsc::Sender<JobResult>>,
    span: Span,
}

impl<Q: Queue> Broker<Q> {
    /// Create a broker over an open connection already watching `config.tube`.
    pub fn new(queue: Q, config: BrokerConfig) -> Self {
        let span = tracing::info_span!("broker", tube = %config.tube);
        Self {
            executor: Executor::new(&config),
            queue,
            config,
            results: None,
            span,
        }
    }

    /// Send every result to `results`.
    ///
    /// Sending waits for channel capacity, so a slow consumer holds back
    /// the next reservation.
    pub fn with_results(mut self, results: mpsc::Sender<JobResult>) -> Self {
        self.results = Some(results);
        self
    }

    /// Log under `span` instead of the default `broker{tube=..}` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Reserve and handle jobs until a fatal error.
    ///
    /// With `ticks`, one job is handled per received tick and the loop ends
    /// cleanly once the sender side is closed.
    pub async fn run(&mut self, ticks: Option<mpsc::Receiver<()>>) -> Result<(), BrokerError> {
        let span = self.span.clone();
        self.run_loop(ticks).instrument(span).await
    }

    async fn run_loop(&mut self, mut ticks: Option<mpsc::Receiver<()>>) -> Result<(), BrokerError> {
        tracing::info!("command: {}", self.config.command);

        loop {
            if let Some(ticks) = ticks.as_mut()
                && ticks.recv().await.is_none()
            {
                break;
            }

            tracing::info!("reserve (waiting for job)");
            let job = self.reserve().await?;
            let result = self.handle_job(job).await?;

            if let Some(ref error) = result.error {
                tracing::warn!(job_id = %result.job_id, "result had error: {}", error);
            }

            if let Some(ref results) = self.results
                && results.send(result).await.is_err()
            {
                tracing::warn!("result receiver dropped; results are no longer forwarded");
                self.results = None;
            }
        }

        tracing::info!("broker finished");
        Ok(())
    }

    /// Reserve the next job, riding out wait timeouts and DEADLINE_SOON.
    pub async fn reserve(&mut self) -> Result<Job, BrokerError> {
        loop {
            match self.queue.reserve(self.config.reserve_timeout).await {
                Ok(reserved) => return Ok(Job::new(reserved, self.config.tube.clone())),
                Err(QueueError::TimedOut) => continue,
                Err(QueueError::DeadlineSoon) => {
                    tracing::warn!(
                        "{} (retrying in {:?})",
                        QueueError::DeadlineSoon,
                        self.config.deadline_soon_delay
                    );
                    tokio::time::sleep(self.config.deadline_soon_delay).await;
                }
                Err(e) => return Err(BrokerError::Reserve(e)),
            }
        }
    }

    /// Bury, or execute and dispatch, a single reserved job.
    pub async fn handle_job(&mut self, job: Job) -> Result<JobResult, BrokerError> {
        let job_id = job.id();
        let stats = job
            .stats(&mut self.queue)
            .await
            .map_err(|source| BrokerError::Stats { job_id, source })?;

        if stats.has_timed_out_before() {
            tracing::info!(%job_id, "job {} has {} timeouts, burying", job_id, stats.timeouts);
            let tube = job.tube().clone();
            job.bury(&mut self.queue, stats.priority)
                .await
                .map_err(|source| BrokerError::Dispatch {
                    job_id,
                    action: "bury",
                    source,
                })?;
            return Ok(JobResult::buried(job_id, tube));
        }

        let time_left = job
            .time_left(&mut self.queue)
            .await
            .map_err(|source| BrokerError::Stats { job_id, source })?;

        tracing::info!(%job_id, "executing job {}", job_id);
        let result = self.executor.execute(&job, time_left).await;
        self.dispatch(job, stats.priority, result).await
    }

    async fn dispatch(
        &mut self,
        job: Job,
        priority: Priority,
        result: JobResult,
    ) -> Result<JobResult, BrokerError> {
        let job_id = job.id();
        let dispatch_error = |action: &'static str| {
            move |source: QueueError| BrokerError::Dispatch {
                job_id,
                action,
                source,
            }
        };

        match result.disposition() {
            Disposition::Delete => {
                tracing::info!(%job_id, "job {} finished with exit(0); deleting", job_id);
                job.delete(&mut self.queue)
                    .await
                    .map_err(dispatch_error("delete"))?;
                Ok(result)
            }
            Disposition::Release => {
                tracing::info!(%job_id, "job {} finished with exit(1); releasing", job_id);
                job.release(&mut self.queue, priority, self.config.release_delay)
                    .await
                    .map_err(dispatch_error("release"))?;
                Ok(result)
            }
            Disposition::AlreadyBuried => Ok(result),
            Disposition::Leave(LeaveReason::TimedOut) => {
                tracing::warn!(%job_id, "job {} timed out; leaving it to the queue", job_id);
                Ok(result)
            }
            Disposition::Leave(LeaveReason::ExecutionFailed) => {
                tracing::warn!(%job_id, "job {} could not be executed; leaving it reserved", job_id);
                Ok(result)
            }
            Disposition::Leave(reason) => {
                // Neither deleted nor released: the reservation lapses on the server.
                tracing::warn!(%job_id, "job {} {}; leaving it reserved", job_id, reason);
                Ok(result.with_error(reason.to_string()))
            }
        }
    }
}
