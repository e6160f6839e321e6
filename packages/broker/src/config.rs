//! Broker configuration.

use std::path::PathBuf;
use std::time::Duration;

use queue_core::TubeName;

/// Shell used to interpret the command string.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Long-poll bound for a single reserve request.
pub const DEFAULT_RESERVE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Pause after DEADLINE_SOON before reserving again.
pub const DEFAULT_DEADLINE_SOON_DELAY: Duration = Duration::from_secs(1);

/// Added to the queue's time-left when arming the SIGTERM timer.
///
/// The queue reports whole seconds, so a job reserved with TTR=1 shows a
/// time-left of 0 while up to a second of budget remains.
pub const DEFAULT_TTR_MARGIN: Duration = Duration::from_secs(1);

/// Bound on reading leftover stdout after the command has exited.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a single broker. Fixed for the broker's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Tube this broker reserves from.
    pub tube: TubeName,
    /// Shell command run for each job, with the job body on stdin.
    pub command: String,
    /// Interpreter invoked as `shell -c command`.
    pub shell: PathBuf,
    pub reserve_timeout: Duration,
    pub deadline_soon_delay: Duration,
    pub ttr_margin: Duration,
    pub drain_timeout: Duration,
    /// Delay applied when releasing a job after exit status 1.
    pub release_delay: Duration,
}

impl BrokerConfig {
    /// Create a config with default timings.
    pub fn new(tube: TubeName, command: impl Into<String>) -> Self {
        Self {
            tube,
            command: command.into(),
            shell: PathBuf::from(DEFAULT_SHELL),
            reserve_timeout: DEFAULT_RESERVE_TIMEOUT,
            deadline_soon_delay: DEFAULT_DEADLINE_SOON_DELAY,
            ttr_margin: DEFAULT_TTR_MARGIN,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            release_delay: Duration::ZERO,
        }
    }

    /// Set the tube.
    pub fn with_tube(mut self, tube: TubeName) -> Self {
        self.tube = tube;
        self
    }

    /// Set the shell.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the reserve long-poll timeout.
    pub fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    /// Set the pause after DEADLINE_SOON.
    pub fn with_deadline_soon_delay(mut self, delay: Duration) -> Self {
        self.deadline_soon_delay = delay;
        self
    }

    /// Set the margin added to the job's time-left.
    pub fn with_ttr_margin(mut self, margin: Duration) -> Self {
        self.ttr_margin = margin;
        self
    }

    /// Set the bound on draining stdout after exit.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the delay for released jobs.
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }
}
