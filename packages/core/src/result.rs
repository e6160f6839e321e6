//! Outcome of handling one reserved job, and the queue action it implies.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::{JobId, TubeName};

/// Snapshot of one attempt at handling a job.
///
/// A result is either `buried` (the command never ran) or `executed`
/// (the command was started, or at least attempted); the two constructors
/// are the only way to obtain one, so both flags are never set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub tube: TubeName,
    /// Buried before execution because an earlier reservation timed out.
    pub buried: bool,
    /// The command was started (or starting it was attempted).
    pub executed: bool,
    /// Exit code of the command. Only set when it exited on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    /// Signal that terminated the command, if it did not exit normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_signal: Option<i32>,
    /// Standard output drained before the outcome was decided.
    #[serde(serialize_with = "lossy_utf8")]
    pub stdout: Vec<u8>,
    /// The command outlived its time budget and was sent SIGTERM.
    pub timed_out: bool,
    /// Local failure while handling the job, independent of the exit status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl JobResult {
    /// Result for a job buried without running the command.
    pub fn buried(job_id: JobId, tube: TubeName) -> Self {
        Self {
            buried: true,
            executed: false,
            ..Self::blank(job_id, tube)
        }
    }

    /// Result for a job whose command was started.
    pub fn executed(job_id: JobId, tube: TubeName) -> Self {
        Self {
            buried: false,
            executed: true,
            started_at: Some(Utc::now()),
            ..Self::blank(job_id, tube)
        }
    }

    fn blank(job_id: JobId, tube: TubeName) -> Self {
        Self {
            job_id,
            tube,
            buried: false,
            executed: false,
            exit_status: None,
            term_signal: None,
            stdout: Vec::new(),
            timed_out: false,
            error: None,
            started_at: None,
            duration_ms: None,
        }
    }

    /// Record a local error, keeping the first one if several occur.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
        self
    }

    /// Stamp the elapsed time since `started_at`.
    pub fn finish(mut self) -> Self {
        if let Some(started_at) = self.started_at {
            let elapsed = Utc::now() - started_at;
            self.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
        }
        self
    }

    /// Standard output as text, replacing invalid UTF-8.
    pub fn stdout_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// The queue action this outcome calls for.
    pub fn disposition(&self) -> Disposition {
        if self.buried {
            return Disposition::AlreadyBuried;
        }
        if self.timed_out {
            return Disposition::Leave(LeaveReason::TimedOut);
        }
        match (self.executed, self.exit_status, self.term_signal) {
            (true, Some(0), _) => Disposition::Delete,
            (true, Some(1), _) => Disposition::Release,
            (true, Some(code), _) => Disposition::Leave(LeaveReason::UnhandledExit(code)),
            (true, None, Some(signal)) => Disposition::Leave(LeaveReason::KilledBySignal(signal)),
            _ => Disposition::Leave(LeaveReason::ExecutionFailed),
        }
    }
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// What the broker does with a job once its result is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Already buried before execution; nothing further to do.
    AlreadyBuried,
    /// Success: remove the job permanently.
    Delete,
    /// Recoverable failure: put the job back for another attempt.
    Release,
    /// Issue no queue command; the reservation runs out on the server.
    Leave(LeaveReason),
}

/// Why a job is left reserved without a queue command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The command exceeded its time budget.
    TimedOut,
    /// The command could not be run or its streams failed.
    ExecutionFailed,
    /// The command exited with a code other than 0 or 1.
    UnhandledExit(i32),
    /// The command was terminated by a signal the broker did not send.
    KilledBySignal(i32),
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveReason::TimedOut => write!(f, "timed out"),
            LeaveReason::ExecutionFailed => write!(f, "execution failed"),
            LeaveReason::UnhandledExit(code) => write!(f, "unhandled exit status {}", code),
            LeaveReason::KilledBySignal(signal) => write!(f, "terminated by signal {}", signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executed() -> JobResult {
        JobResult::executed(JobId(9), TubeName::default())
    }

    #[test]
    fn buried_and_executed_are_exclusive() {
        let buried = JobResult::buried(JobId(1), TubeName::default());
        assert!(buried.buried && !buried.executed);
        assert_eq!(buried.disposition(), Disposition::AlreadyBuried);

        let ran = executed();
        assert!(ran.executed && !ran.buried);
        assert!(ran.started_at.is_some());
    }

    #[test]
    fn exit_codes_map_to_actions() {
        let mut result = executed();
        result.exit_status = Some(0);
        assert_eq!(result.disposition(), Disposition::Delete);

        result.exit_status = Some(1);
        assert_eq!(result.disposition(), Disposition::Release);

        result.exit_status = Some(7);
        assert_eq!(
            result.disposition(),
            Disposition::Leave(LeaveReason::UnhandledExit(7))
        );

        // Recording the error afterwards does not change the decision.
        let result = result.with_error("unhandled exit status 7");
        assert_eq!(
            result.disposition(),
            Disposition::Leave(LeaveReason::UnhandledExit(7))
        );
    }

    #[test]
    fn timeout_wins_over_exit_status() {
        let mut result = executed();
        result.timed_out = true;
        result.exit_status = Some(0);
        assert_eq!(result.disposition(), Disposition::Leave(LeaveReason::TimedOut));
    }

    #[test]
    fn missing_exit_status() {
        let failed = executed().with_error("spawn failed");
        assert_eq!(
            failed.disposition(),
            Disposition::Leave(LeaveReason::ExecutionFailed)
        );

        let mut killed = executed();
        killed.term_signal = Some(9);
        assert_eq!(
            killed.disposition(),
            Disposition::Leave(LeaveReason::KilledBySignal(9))
        );
    }

    #[test]
    fn first_error_is_kept() {
        let result = executed().with_error("first").with_error("second");
        assert_eq!(result.error.as_deref(), Some("first"));
    }

    #[test]
    fn serializes_stdout_as_text() {
        let mut result = executed();
        result.exit_status = Some(0);
        result.stdout = b"hello\n".to_vec();
        let json = serde_json::to_value(&result).unwrap_or_default();
        assert_eq!(json["stdout"], "hello\n");
        assert_eq!(json["job_id"], 9);
        assert_eq!(json["tube"], "default");
        assert!(json.get("error").is_none());
    }
}
