//! In-process queue with beanstalkd semantics.
//!
//! Clones share the same job store, so a test can keep one handle to put
//! jobs and inspect calls while the broker owns another.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use queue_core::{JobId, JobState, JobStats, Priority, TubeName};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{Connect, Queue, QueueError, ReservedJob};

/// A queue operation recorded by [`MemoryQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCall {
    Reserve,
    Delete(JobId),
    Release {
        id: JobId,
        priority: Priority,
        delay: Duration,
    },
    Bury {
        id: JobId,
        priority: Priority,
    },
    StatsJob(JobId),
    ListTubes,
}

impl QueueCall {
    /// The job this call targeted, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueCall::Delete(id) | QueueCall::StatsJob(id) => Some(*id),
            QueueCall::Release { id, .. } | QueueCall::Bury { id, .. } => Some(*id),
            QueueCall::Reserve | QueueCall::ListTubes => None,
        }
    }
}

/// A job to put into a [`MemoryQueue`].
#[derive(Debug, Clone)]
pub struct PutJob {
    tube: TubeName,
    body: Vec<u8>,
    priority: Priority,
    ttr: Duration,
    timeouts: u64,
}

impl PutJob {
    /// Create a job for the `default` tube with a 60 second TTR.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            tube: TubeName::default(),
            body: body.into(),
            priority: 1024,
            ttr: Duration::from_secs(60),
            timeouts: 0,
        }
    }

    /// Set the tube.
    pub fn in_tube(mut self, tube: TubeName) -> Self {
        self.tube = tube;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the time-to-run. The queue enforces a minimum of one second.
    pub fn with_ttr(mut self, ttr: Duration) -> Self {
        self.ttr = ttr.max(Duration::from_secs(1));
        self
    }

    /// Pretend earlier reservations of this job already timed out.
    pub fn with_timeouts(mut self, timeouts: u64) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[derive(Debug)]
struct StoredJob {
    tube: TubeName,
    body: Vec<u8>,
    priority: Priority,
    ttr: Duration,
    state: JobState,
    created_at: Instant,
    /// Reservation deadline while reserved, ready time while delayed.
    until: Option<Instant>,
    reserves: u64,
    timeouts: u64,
    releases: u64,
    buries: u64,
}

#[derive(Debug, Default)]
struct Store {
    next_id: u64,
    jobs: BTreeMap<JobId, StoredJob>,
    scripted: VecDeque<QueueError>,
    calls: Vec<QueueCall>,
}

impl Store {
    /// Apply time-based transitions: lapsed reservations and finished delays.
    fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for (id, job) in self.jobs.iter_mut() {
            let Some(until) = job.until else { continue };
            if until > now {
                continue;
            }
            match job.state {
                JobState::Reserved => {
                    tracing::debug!("Reservation of job {} lapsed", id);
                    job.timeouts += 1;
                    job.state = JobState::Ready;
                }
                JobState::Delayed => job.state = JobState::Ready,
                _ => {}
            }
            job.until = None;
            changed = true;
        }
        changed
    }

    fn next_wake(&self) -> Option<Instant> {
        self.jobs.values().filter_map(|job| job.until).min()
    }

    fn take_ready(&mut self, tube: &TubeName, now: Instant) -> Option<ReservedJob> {
        let (id, job) = self
            .jobs
            .iter_mut()
            .filter(|(_, job)| job.state == JobState::Ready && &job.tube == tube)
            .min_by_key(|(id, job)| (job.priority, **id))?;
        job.state = JobState::Reserved;
        job.until = Some(now + job.ttr);
        job.reserves += 1;
        Some(ReservedJob {
            id: *id,
            body: job.body.clone(),
        })
    }

    fn reserved_mut(&mut self, id: JobId) -> Result<&mut StoredJob, QueueError> {
        self.jobs
            .get_mut(&id)
            .filter(|job| job.state == JobState::Reserved)
            .ok_or(QueueError::NotFound)
    }
}

/// In-memory queue watching a single tube.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    store: Arc<Mutex<Store>>,
    notify: Arc<Notify>,
    tube: TubeName,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Create an empty queue watching `default`.
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            notify: Arc::new(Notify::new()),
            tube: TubeName::default(),
        }
    }

    /// Another handle to the same store, watching `tube`.
    pub fn watching(&self, tube: TubeName) -> Self {
        Self {
            store: self.store.clone(),
            notify: self.notify.clone(),
            tube,
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a ready job and return its ID.
    pub fn put(&self, job: PutJob) -> JobId {
        let id = {
            let mut store = self.store();
            store.next_id += 1;
            let id = JobId(store.next_id);
            store.jobs.insert(
                id,
                StoredJob {
                    tube: job.tube,
                    body: job.body,
                    priority: job.priority,
                    ttr: job.ttr,
                    state: JobState::Ready,
                    created_at: Instant::now(),
                    until: None,
                    reserves: 0,
                    timeouts: job.timeouts,
                    releases: 0,
                    buries: 0,
                },
            );
            id
        };
        self.notify.notify_waiters();
        id
    }

    /// Make the next `reserve` calls fail with these errors, in order.
    pub fn script_reserve(&self, errors: impl IntoIterator<Item = QueueError>) {
        self.store().scripted.extend(errors);
        self.notify.notify_waiters();
    }

    /// Every call made through any handle, oldest first.
    pub fn calls(&self) -> Vec<QueueCall> {
        self.store().calls.clone()
    }

    /// Calls that targeted `id`.
    pub fn calls_for(&self, id: JobId) -> Vec<QueueCall> {
        self.store()
            .calls
            .iter()
            .filter(|call| call.job_id() == Some(id))
            .cloned()
            .collect()
    }

    /// Current state of a job, or `None` once deleted.
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        let mut store = self.store();
        store.tick(Instant::now());
        store.jobs.get(&id).map(|job| job.state)
    }

    fn record(&self, call: QueueCall) {
        self.store().calls.push(call);
    }
}

impl Queue for MemoryQueue {
    async fn reserve(&mut self, timeout: Duration) -> Result<ReservedJob, QueueError> {
        self.record(QueueCall::Reserve);
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut store = self.store();
                if let Some(error) = store.scripted.pop_front() {
                    return Err(error);
                }
                let now = Instant::now();
                store.tick(now);
                if let Some(job) = store.take_ready(&self.tube, now) {
                    return Ok(job);
                }
                if now >= deadline {
                    return Err(QueueError::TimedOut);
                }
                store.next_wake().map_or(deadline, |wake| wake.min(deadline))
            };

            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete(&mut self, id: JobId) -> Result<(), QueueError> {
        self.record(QueueCall::Delete(id));
        let mut store = self.store();
        store.tick(Instant::now());
        store.jobs.remove(&id).map(|_| ()).ok_or(QueueError::NotFound)
    }

    async fn release(
        &mut self,
        id: JobId,
        priority: Priority,
        delay: Duration,
    ) -> Result<(), QueueError> {
        self.record(QueueCall::Release {
            id,
            priority,
            delay,
        });
        {
            let now = Instant::now();
            let mut store = self.store();
            store.tick(now);
            let job = store.reserved_mut(id)?;
            job.priority = priority;
            job.releases += 1;
            if delay.is_zero() {
                job.state = JobState::Ready;
                job.until = None;
            } else {
                job.state = JobState::Delayed;
                job.until = Some(now + delay);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn bury(&mut self, id: JobId, priority: Priority) -> Result<(), QueueError> {
        self.record(QueueCall::Bury { id, priority });
        let mut store = self.store();
        store.tick(Instant::now());
        let job = store.reserved_mut(id)?;
        job.priority = priority;
        job.state = JobState::Buried;
        job.until = None;
        job.buries += 1;
        Ok(())
    }

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats, QueueError> {
        self.record(QueueCall::StatsJob(id));
        let now = Instant::now();
        let mut store = self.store();
        store.tick(now);
        let job = store.jobs.get(&id).ok_or(QueueError::NotFound)?;

        let time_left = job
            .until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();

        Ok(JobStats {
            id,
            tube: job.tube.to_string(),
            state: job.state,
            priority: job.priority,
            age: now.saturating_duration_since(job.created_at).as_secs(),
            ttr: job.ttr,
            // The server reports whole seconds, rounding down.
            time_left: Duration::from_secs(time_left.as_secs()),
            reserves: job.reserves,
            timeouts: job.timeouts,
            releases: job.releases,
            buries: job.buries,
            kicks: 0,
        })
    }

    async fn list_tubes(&mut self) -> Result<Vec<TubeName>, QueueError> {
        self.record(QueueCall::ListTubes);
        let mut tubes: Vec<TubeName> = self
            .store()
            .jobs
            .values()
            .map(|job| job.tube.clone())
            .collect();
        tubes.push(TubeName::default());
        tubes.sort();
        tubes.dedup();
        Ok(tubes)
    }
}

impl Connect for MemoryQueue {
    type Queue = MemoryQueue;

    async fn connect(&self, tube: &TubeName) -> Result<MemoryQueue, QueueError> {
        Ok(self.watching(tube.clone()))
    }
}
