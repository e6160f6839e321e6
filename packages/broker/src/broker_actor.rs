//! Actor that owns one broker loop.

use std::marker::PhantomData;
use std::sync::Arc;

use queue_client::Connect;
use queue_core::{JobResult, TubeName};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::messages::BrokerMessage;

/// State for the broker actor.
pub struct BrokerActorState {
    /// Unique broker ID.
    pub broker_id: String,
    /// Tube the broker reserves from.
    pub tube: TubeName,
    task: Option<JoinHandle<()>>,
}

/// Broker actor arguments.
pub struct BrokerArgs<C> {
    pub broker_id: String,
    pub connector: Arc<C>,
    pub config: BrokerConfig,
    pub results: Option<mpsc::Sender<JobResult>>,
}

/// Runs a [`Broker`] on its own task.
///
/// The actor stops normally when the broker loop returns `Ok` and fails
/// with the [`BrokerError`] otherwise, so a supervisor sees broker errors
/// as `ActorFailed`.
pub struct BrokerActor<C>(PhantomData<fn() -> C>);

impl<C> BrokerActor<C> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C> Default for BrokerActor<C> {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_broker<C: Connect>(
    broker_id: &str,
    connector: &C,
    config: BrokerConfig,
    results: Option<mpsc::Sender<JobResult>>,
) -> Result<(), BrokerError> {
    let span = tracing::info_span!("broker", broker_id = %broker_id, tube = %config.tube);
    let queue = connector
        .connect(&config.tube)
        .await
        .map_err(BrokerError::Connect)?;

    let mut broker = Broker::new(queue, config).with_span(span);
    if let Some(results) = results {
        broker = broker.with_results(results);
    }
    broker.run(None).await
}

impl<C: Connect> Actor for BrokerActor<C> {
    type Msg = BrokerMessage;
    type State = BrokerActorState;
    type Arguments = BrokerArgs<C>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting broker {} on tube {}", args.broker_id, args.config.tube);

        let tube = args.config.tube.clone();
        let broker_id = args.broker_id.clone();
        let myself_clone = myself.clone();
        let task = tokio::spawn(async move {
            let outcome =
                run_broker(&args.broker_id, &*args.connector, args.config, args.results).await;
            let _ = myself_clone.send_message(BrokerMessage::Finished(outcome));
        });

        Ok(BrokerActorState {
            broker_id,
            tube,
            task: Some(task),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::Finished(Ok(())) => {
                tracing::info!("Broker {} finished", state.broker_id);
                state.task = None;
                myself.stop(None);
            }

            BrokerMessage::Finished(Err(e)) => {
                tracing::error!("Broker {} on tube {} failed: {}", state.broker_id, state.tube, e);
                state.task = None;
                return Err(Box::new(e));
            }

            BrokerMessage::Shutdown => {
                tracing::info!("Shutting down broker: {}", state.broker_id);
                if let Some(task) = state.task.take() {
                    task.abort();
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(task) = state.task.take() {
            task.abort();
        }
        Ok(())
    }
}
