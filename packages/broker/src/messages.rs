//! Message types for actor communication.

use queue_core::TubeName;
use ractor::RpcReplyPort;

use crate::error::BrokerError;

/// Messages for the BrokerActor.
#[derive(Debug)]
pub enum BrokerMessage {
    /// The broker loop returned.
    Finished(Result<(), BrokerError>),

    /// Stop the broker without waiting for the current job.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Periodic tick; drives tube discovery.
    Tick,

    /// Start a replacement broker for a tube.
    Respawn { tube: TubeName },

    /// List running brokers.
    ListBrokers { reply: RpcReplyPort<Vec<BrokerInfo>> },

    /// Stop every broker, then the supervisor.
    Shutdown,
}

/// A running broker, as reported by [`SupervisorMessage::ListBrokers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    /// Actor name, unique for the process.
    pub name: String,
    pub broker_id: String,
    pub tube: TubeName,
}
