//! Runs a shell command for every job reserved from a beanstalkd tube.
//!
//! A [`Broker`] reserves one job at a time, feeds its body to the command's
//! stdin and decides the job's fate from how the command ended:
//!
//! - exit status 0: the job is deleted
//! - exit status 1: the job is released for another attempt
//! - a job that already timed out once is buried before it runs again
//! - anything else leaves the reservation to lapse on the server
//!
//! # Architecture
//!
//! - `Broker` - The reserve / execute / dispatch loop for one tube
//! - `Executor` - Spawns the command and enforces the TTR deadline
//! - `BrokerActor` - Owns one broker loop on its own task
//! - `Supervisor` - Starts brokers per tube and restarts failed ones
//!
//! # Usage
//!
//! ```ignore
//! use broker::{BrokerConfig, SupervisorConfig, start_supervisor};
//! use queue_client::ClientConfig;
//!
//! let config = BrokerConfig::new("default".parse()?, "./handle-job.sh");
//! let handle = start_supervisor(ClientConfig::default(), SupervisorConfig::new(config)).await?;
//! handle.wait().await?;
//! ```

mod broker;
mod broker_actor;
mod config;
mod error;
mod executor;
mod job;
mod messages;
mod supervisor;

pub use broker::Broker;
pub use broker_actor::{BrokerActor, BrokerActorState, BrokerArgs};
pub use config::{
    BrokerConfig, DEFAULT_DEADLINE_SOON_DELAY, DEFAULT_DRAIN_TIMEOUT, DEFAULT_RESERVE_TIMEOUT,
    DEFAULT_SHELL, DEFAULT_TTR_MARGIN,
};
pub use error::BrokerError;
pub use executor::Executor;
pub use job::Job;
pub use messages::{BrokerInfo, BrokerMessage, SupervisorMessage};
pub use supervisor::{
    DEFAULT_DISCOVERY_INTERVAL, RestartPolicy, Supervisor, SupervisorArgs, SupervisorConfig,
    SupervisorError, SupervisorHandle, SupervisorState, start_supervisor,
};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
