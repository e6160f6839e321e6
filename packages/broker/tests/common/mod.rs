#![allow(dead_code)]

use std::error::Error;
use std::time::Duration;

use broker::{Broker, BrokerConfig, Job};
use queue_client::{MemoryQueue, ReservedJob};
use queue_core::{JobId, JobResult, TubeName};
use tokio::sync::mpsc;

/// Available on every test host, unlike bash.
pub const SHELL: &str = "/bin/sh";

pub fn config(command: &str) -> BrokerConfig {
    BrokerConfig::new(TubeName::default(), command)
        .with_shell(SHELL)
        .with_reserve_timeout(Duration::from_secs(5))
        .with_drain_timeout(Duration::from_millis(500))
}

pub fn job(id: u64, body: &str) -> Job {
    Job::new(
        ReservedJob {
            id: JobId(id),
            body: body.as_bytes().to_vec(),
        },
        TubeName::default(),
    )
}

/// Handle exactly one job through the tick gate and return its result.
pub async fn run_once(
    queue: &MemoryQueue,
    config: BrokerConfig,
) -> Result<JobResult, Box<dyn Error>> {
    let (results_tx, mut results_rx) = mpsc::channel(1);
    let (tick_tx, tick_rx) = mpsc::channel(1);
    tick_tx.send(()).await?;
    drop(tick_tx);

    let mut broker = Broker::new(queue.watching(config.tube.clone()), config)
        .with_results(results_tx);
    broker.run(Some(tick_rx)).await?;

    let result = results_rx.try_recv()?;
    Ok(result)
}
