//! Job identity and queue-side statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier assigned to a job by the queue server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Parse a job ID from its decimal wire form.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.parse()?))
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority as understood by the queue: lower values are served first.
pub type Priority = u32;

/// Server-side state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Ready,
    Reserved,
    Delayed,
    Buried,
}

impl JobState {
    /// Parse the state name reported by `stats-job`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(JobState::Ready),
            "reserved" => Some(JobState::Reserved),
            "delayed" => Some(JobState::Delayed),
            "buried" => Some(JobState::Buried),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Ready => "ready",
            JobState::Reserved => "reserved",
            JobState::Delayed => "delayed",
            JobState::Buried => "buried",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics the queue keeps for a single job.
///
/// All counters are computed by the server; the broker only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub id: JobId,
    pub tube: String,
    pub state: JobState,
    pub priority: Priority,
    /// Seconds since the job was created.
    pub age: u64,
    /// Time-to-run granted for each reservation.
    pub ttr: Duration,
    /// Remaining time before the reservation lapses, truncated to whole seconds.
    pub time_left: Duration,
    pub reserves: u64,
    /// How many reservations of this job have already run out of time.
    pub timeouts: u64,
    pub releases: u64,
    pub buries: u64,
    pub kicks: u64,
}

impl JobStats {
    /// Whether a previous reservation of this job exceeded its time budget.
    pub fn has_timed_out_before(&self) -> bool {
        self.timeouts > 0
    }
}
