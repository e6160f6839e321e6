//! Runs the configured command for a job under a deadline.

use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use queue_core::JobResult;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;

use crate::config::BrokerConfig;
use crate::job::Job;

/// Spawns `shell -c command` for each job.
///
/// The job body is written to the command's stdin, which is then closed.
/// Stdout is captured into the result; stderr goes to the broker's own
/// stderr.
#[derive(Debug, Clone)]
pub struct Executor {
    shell: PathBuf,
    command: String,
    ttr_margin: Duration,
    drain_timeout: Duration,
}

impl Executor {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            command: config.command.clone(),
            ttr_margin: config.ttr_margin,
            drain_timeout: config.drain_timeout,
        }
    }

    /// Run the command for `job`, allowing `time_left` plus the margin.
    ///
    /// Never fails: problems starting or talking to the command are
    /// reported through `JobResult::error`.
    pub async fn execute(&self, job: &Job, time_left: Duration) -> JobResult {
        let deadline = Instant::now() + time_left + self.ttr_margin;
        let result = JobResult::executed(job.id(), job.tube().clone());

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                return result
                    .with_error(format!("failed to start command: {}", e))
                    .finish();
            }
        };

        match self.run(&mut child, job, deadline, result).await {
            Outcome::Exited(result) => result.finish(),
            Outcome::Deadline(mut result) => {
                terminate(&child, job);
                result.timed_out = true;
                result.finish()
            }
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }

    async fn run(
        &self,
        child: &mut Child,
        job: &Job,
        deadline: Instant,
        mut result: JobResult,
    ) -> Outcome {
        if let Some(mut stdin) = child.stdin.take() {
            match tokio::time::timeout_at(deadline, stdin.write_all(job.body())).await {
                Ok(Ok(())) => {}
                // The command exited or closed stdin without reading it all.
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                    tracing::debug!(job_id = %job.id(), "command did not read its whole input");
                }
                Ok(Err(e)) => {
                    return Outcome::Exited(
                        result.with_error(format!("failed to write job body: {}", e)),
                    );
                }
                Err(_) => return Outcome::Deadline(result),
            }
            drop(stdin);
        }

        let Some(mut stdout) = child.stdout.take() else {
            return Outcome::Exited(result.with_error("command stdout was not captured"));
        };

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        let mut open = true;

        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => {
                            result.exit_status = status.code();
                            result.term_signal = status.signal();
                        }
                        Err(e) => {
                            result = result.with_error(format!("failed to wait for command: {}", e));
                        }
                    }
                    if open {
                        self.drain(&mut stdout, &mut result).await;
                    }
                    return Outcome::Exited(result);
                }
                _ = &mut expired => return Outcome::Deadline(result),
                read = stdout.read_buf(&mut result.stdout), if open => match read {
                    Ok(0) => open = false,
                    Ok(n) => tracing::debug!(job_id = %job.id(), "stdout: {} bytes", n),
                    Err(e) => {
                        open = false;
                        result = result.with_error(format!("failed to read stdout: {}", e));
                    }
                },
            }
        }
    }

    /// Collect output still buffered in the pipe once the command is gone.
    async fn drain(&self, stdout: &mut ChildStdout, result: &mut JobResult) {
        let mut rest = Vec::new();
        match tokio::time::timeout(self.drain_timeout, stdout.read_to_end(&mut rest)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("failed to drain stdout: {}", e),
            // A background process inherited the pipe; stop waiting for EOF.
            Err(_) => tracing::warn!("stdout still open {:?} after exit", self.drain_timeout),
        }
        result.stdout.extend_from_slice(&rest);
    }
}

enum Outcome {
    Exited(JobResult),
    Deadline(JobResult),
}

/// Ask the command to stop. There is no follow-up SIGKILL.
fn terminate(child: &Child, job: &Job) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    tracing::warn!(job_id = %job.id(), "Sending SIGTERM to worker PID {}", pid);
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(job_id = %job.id(), "Failed to signal PID {}: {}", pid, e);
    }
}
