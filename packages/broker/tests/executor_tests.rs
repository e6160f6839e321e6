mod common;

use std::error::Error;
use std::time::{Duration, Instant};

use broker::Executor;
use queue_core::{Disposition, LeaveReason};

#[tokio::test]
async fn test_exit_zero_captures_stdout() -> Result<(), Box<dyn Error>> {
    let executor = Executor::new(&common::config("cat; echo done"));
    let job = common::job(1, "hello\n");

    let result = executor.execute(&job, Duration::from_secs(10)).await;

    assert!(result.executed);
    assert!(!result.timed_out);
    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout_lossy(), "hello\ndone\n");
    assert!(result.error.is_none());
    assert!(result.duration_ms.is_some());
    assert_eq!(result.disposition(), Disposition::Delete);
    Ok(())
}

#[tokio::test]
async fn test_exit_status_is_reported() -> Result<(), Box<dyn Error>> {
    let executor = Executor::new(&common::config("exit 7"));

    let result = executor
        .execute(&common::job(2, ""), Duration::from_secs(10))
        .await;

    assert_eq!(result.exit_status, Some(7));
    assert!(!result.timed_out);
    assert_eq!(
        result.disposition(),
        Disposition::Leave(LeaveReason::UnhandledExit(7))
    );
    Ok(())
}

#[tokio::test]
async fn test_command_may_ignore_its_input() -> Result<(), Box<dyn Error>> {
    let executor = Executor::new(&common::config("exit 1"));
    let body = "x".repeat(1 << 20);

    let result = executor
        .execute(&common::job(3, &body), Duration::from_secs(10))
        .await;

    assert_eq!(result.exit_status, Some(1));
    assert!(result.error.is_none());
    assert_eq!(result.disposition(), Disposition::Release);
    Ok(())
}

#[tokio::test]
async fn test_deadline_sends_sigterm() -> Result<(), Box<dyn Error>> {
    let executor = Executor::new(&common::config("sleep 30"));
    let started = Instant::now();

    // Zero whole seconds left still allows the one second margin.
    let result = executor
        .execute(&common::job(4, ""), Duration::ZERO)
        .await;

    let elapsed = started.elapsed();
    assert!(result.timed_out);
    assert!(result.exit_status.is_none());
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10));
    assert_eq!(result.disposition(), Disposition::Leave(LeaveReason::TimedOut));
    Ok(())
}

#[tokio::test]
async fn test_deadline_signals_command_once() -> Result<(), Box<dyn Error>> {
    let marker = std::env::temp_dir().join(format!("broker-sigterm-{}", std::process::id()));
    let _ = std::fs::remove_file(&marker);
    let command = format!(
        "trap 'echo x >> {}; exit 0' TERM; while true; do sleep 0.1; done",
        marker.display()
    );
    let executor = Executor::new(&common::config(&command));

    let result = executor
        .execute(&common::job(8, ""), Duration::ZERO)
        .await;
    assert!(result.timed_out);

    // The trap runs once the current `sleep 0.1` returns.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let handled = std::fs::read_to_string(&marker)?;
    let _ = std::fs::remove_file(&marker);
    assert_eq!(handled.lines().collect::<Vec<_>>(), ["x"]);
    Ok(())
}

#[tokio::test]
async fn test_output_before_deadline_is_kept() -> Result<(), Box<dyn Error>> {
    let executor = Executor::new(&common::config("echo partial; sleep 30"));

    let result = executor
        .execute(&common::job(5, ""), Duration::ZERO)
        .await;

    assert!(result.timed_out);
    assert_eq!(result.stdout_lossy(), "partial\n");
    Ok(())
}

#[tokio::test]
async fn test_killed_by_signal() -> Result<(), Box<dyn Error>> {
    let executor = Executor::new(&common::config("kill -KILL $$"));

    let result = executor
        .execute(&common::job(6, ""), Duration::from_secs(10))
        .await;

    assert!(result.exit_status.is_none());
    assert_eq!(result.term_signal, Some(9));
    assert_eq!(
        result.disposition(),
        Disposition::Leave(LeaveReason::KilledBySignal(9))
    );
    Ok(())
}

#[tokio::test]
async fn test_spawn_failure_is_reported() -> Result<(), Box<dyn Error>> {
    let config = common::config("true").with_shell("/nonexistent/shell");
    let executor = Executor::new(&config);

    let result = executor
        .execute(&common::job(7, ""), Duration::from_secs(10))
        .await;

    assert!(result.executed);
    assert!(result.exit_status.is_none());
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("failed to start command"))
    );
    assert_eq!(
        result.disposition(),
        Disposition::Leave(LeaveReason::ExecutionFailed)
    );
    Ok(())
}
