//! Core domain types for the command broker.
//!
//! This crate contains shared types used across all packages:
//! - JobId and JobStats for reserved work items
//! - TubeName for the queue partitions a broker serves
//! - JobResult and Disposition for execution outcomes

mod job;
mod result;
mod tube;

pub use job::{JobId, JobState, JobStats, Priority};
pub use result::{Disposition, JobResult, LeaveReason};
pub use tube::{MAX_TUBE_NAME_LEN, TubeName, TubeNameError};
