mod common;

use std::error::Error;
use std::time::Duration;

use broker::{Broker, BrokerError, Job};
use queue_client::{MemoryQueue, PutJob, QueueCall, QueueError};
use queue_core::{JobState, TubeName};
use tokio::sync::mpsc;

fn reserve_calls(queue: &MemoryQueue) -> usize {
    queue
        .calls()
        .into_iter()
        .filter(|call| *call == QueueCall::Reserve)
        .count()
}

async fn wait_for_reserves(queue: &MemoryQueue, count: usize) -> Result<(), Box<dyn Error>> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while reserve_calls(queue) < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}

fn terminal_calls(queue: &MemoryQueue, id: queue_core::JobId) -> Vec<QueueCall> {
    queue
        .calls_for(id)
        .into_iter()
        .filter(|call| !matches!(call, QueueCall::StatsJob(_)))
        .collect()
}

#[tokio::test]
async fn test_success_deletes_job() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new("payload"));

    let result = common::run_once(&queue, common::config("cat")).await?;

    assert_eq!(result.job_id, id);
    assert!(result.executed && !result.buried);
    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout_lossy(), "payload");
    assert_eq!(terminal_calls(&queue, id), vec![QueueCall::Delete(id)]);
    assert_eq!(queue.job_state(id), None);
    Ok(())
}

#[tokio::test]
async fn test_exit_one_releases_with_job_priority() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new("retry me").with_priority(42));

    let result = common::run_once(&queue, common::config("exit 1")).await?;

    assert_eq!(result.exit_status, Some(1));
    assert_eq!(
        terminal_calls(&queue, id),
        vec![QueueCall::Release {
            id,
            priority: 42,
            delay: Duration::ZERO,
        }]
    );
    assert_eq!(queue.job_state(id), Some(JobState::Ready));
    Ok(())
}

#[tokio::test]
async fn test_release_delay_is_applied() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new(""));
    let config = common::config("exit 1").with_release_delay(Duration::from_secs(30));

    common::run_once(&queue, config).await?;

    assert_eq!(queue.job_state(id), Some(JobState::Delayed));
    Ok(())
}

#[tokio::test]
async fn test_unhandled_exit_leaves_job_reserved() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new(""));

    let result = common::run_once(&queue, common::config("exit 7")).await?;

    assert_eq!(result.exit_status, Some(7));
    assert_eq!(result.error.as_deref(), Some("unhandled exit status 7"));
    assert!(terminal_calls(&queue, id).is_empty());
    assert_eq!(queue.job_state(id), Some(JobState::Reserved));
    Ok(())
}

#[tokio::test]
async fn test_timeout_issues_no_queue_command() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new("").with_ttr(Duration::from_secs(1)));

    let result = common::run_once(&queue, common::config("sleep 30")).await?;

    assert!(result.timed_out);
    assert!(result.exit_status.is_none());
    assert!(terminal_calls(&queue, id).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_previously_timed_out_job_is_buried() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new("").with_priority(7).with_timeouts(1));
    let marker = std::env::temp_dir().join(format!("broker-bury-{}", std::process::id()));
    let command = format!("touch {}", marker.display());

    let result = common::run_once(&queue, common::config(&command)).await?;

    assert!(result.buried);
    assert!(!result.executed);
    assert!(!marker.exists());
    assert_eq!(
        terminal_calls(&queue, id),
        vec![QueueCall::Bury { id, priority: 7 }]
    );
    assert_eq!(queue.job_state(id), Some(JobState::Buried));
    Ok(())
}

#[tokio::test]
async fn test_job_reports_timeouts() -> Result<(), Box<dyn Error>> {
    let mut queue = MemoryQueue::new();
    let id = queue.put(PutJob::new("").with_timeouts(3));
    let mut broker = Broker::new(queue.clone(), common::config("true"));

    let job: Job = broker.reserve().await?;

    assert_eq!(job.id(), id);
    assert_eq!(job.timeouts(&mut queue).await?, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deadline_soon_backs_off_once() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    queue.script_reserve([
        QueueError::TimedOut,
        QueueError::TimedOut,
        QueueError::DeadlineSoon,
    ]);
    let id = queue.put(PutJob::new(""));
    let mut broker = Broker::new(queue.clone(), common::config("true"));
    let started = tokio::time::Instant::now();

    let job = broker.reserve().await?;

    assert_eq!(job.id(), id);
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    let reserves = queue
        .calls()
        .into_iter()
        .filter(|call| *call == QueueCall::Reserve)
        .count();
    assert_eq!(reserves, 4);
    Ok(())
}

#[tokio::test]
async fn test_fatal_reserve_error_stops_broker() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    queue.script_reserve([QueueError::Closed]);
    let mut broker = Broker::new(queue.clone(), common::config("true"));

    let outcome = broker.run(None).await;

    assert!(matches!(
        outcome,
        Err(BrokerError::Reserve(QueueError::Closed))
    ));
    Ok(())
}

#[tokio::test]
async fn test_closed_tick_gate_stops_cleanly() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new(""));
    let (tick_tx, tick_rx) = mpsc::channel::<()>(1);
    drop(tick_tx);
    let mut broker = Broker::new(queue.clone(), common::config("true"));

    broker.run(Some(tick_rx)).await?;

    assert_eq!(queue.job_state(id), Some(JobState::Ready));
    assert!(queue.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_jobs_on_other_tubes_are_ignored() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let emails: TubeName = "emails".parse()?;
    let other = queue.put(PutJob::new(""));
    let id = queue.put(PutJob::new("").in_tube(emails.clone()));

    let result =
        common::run_once(&queue, common::config("true").with_tube(emails.clone())).await?;

    assert_eq!(result.job_id, id);
    assert_eq!(result.tube, emails);
    assert_eq!(queue.job_state(other), Some(JobState::Ready));
    Ok(())
}

#[tokio::test]
async fn test_one_job_per_tick() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let first = queue.put(PutJob::new("1"));
    let second = queue.put(PutJob::new("2"));
    let third = queue.put(PutJob::new("3"));
    let (results_tx, mut results_rx) = mpsc::channel(4);
    let (tick_tx, tick_rx) = mpsc::channel(4);
    tick_tx.send(()).await?;
    tick_tx.send(()).await?;
    drop(tick_tx);
    let mut broker =
        Broker::new(queue.clone(), common::config("cat")).with_results(results_tx);

    broker.run(Some(tick_rx)).await?;

    assert_eq!(results_rx.recv().await.map(|r| r.job_id), Some(first));
    assert_eq!(results_rx.recv().await.map(|r| r.job_id), Some(second));
    assert_eq!(queue.job_state(third), Some(JobState::Ready));
    Ok(())
}

#[tokio::test]
async fn test_vanished_job_is_fatal() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let id = queue.put(PutJob::new(""));
    let mut broker = Broker::new(queue.clone(), common::config("true"));
    let job = broker.reserve().await?;
    // Another client removes the job before its stats are read.
    let mut other = queue.clone();
    queue_client::Queue::delete(&mut other, id).await?;

    let outcome = broker.handle_job(job).await;

    assert!(matches!(outcome, Err(BrokerError::Stats { job_id, .. }) if job_id == id));
    Ok(())
}

#[tokio::test]
async fn test_unread_result_holds_back_next_reservation() -> Result<(), Box<dyn Error>> {
    let queue = MemoryQueue::new();
    let first = queue.put(PutJob::new("1"));
    queue.put(PutJob::new("2"));
    let third = queue.put(PutJob::new("3"));
    let (results_tx, mut results_rx) = mpsc::channel(1);
    let mut broker = Broker::new(queue.clone(), common::config("true")).with_results(results_tx);
    let task = tokio::spawn(async move { broker.run(None).await });

    // One result sits in the channel; the second job's result waits in `send`.
    wait_for_reserves(&queue, 2).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(reserve_calls(&queue), 2);
    assert_eq!(queue.job_state(third), Some(JobState::Ready));

    let delivered = results_rx.recv().await.map(|result| result.job_id);
    assert_eq!(delivered, Some(first));
    wait_for_reserves(&queue, 3).await?;

    task.abort();
    Ok(())
}
