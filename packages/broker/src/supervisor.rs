//! Supervisor actor for running brokers across tubes.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use queue_client::{Connect, Queue};
use queue_core::{JobResult, TubeName};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SpawnErr, SupervisionEvent};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::broker_actor::{BrokerActor, BrokerArgs};
use crate::config::BrokerConfig;
use crate::messages::{BrokerInfo, BrokerMessage, SupervisorMessage};

/// How often `list-tubes` runs when serving all tubes.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Why the supervisor stopped.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("brokers on tube {tube} failed {failures} times")]
    RestartLimit { tube: TubeName, failures: u32 },
    #[error("failed to spawn broker: {0}")]
    Spawn(#[from] SpawnErr),
    #[error("supervisor stopped without reporting an outcome")]
    Aborted,
}

/// Replacement of failed brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Failures tolerated per tube before the supervisor gives up.
    pub max_restarts: u32,
    /// Wait before starting a replacement.
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// What the supervisor runs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Per-broker settings; `tube` is replaced for each broker.
    pub template: BrokerConfig,
    pub tubes: Vec<TubeName>,
    /// Brokers started for each tube.
    pub per_tube: usize,
    /// Serve every tube on the server, including ones created later.
    pub all_tubes: bool,
    pub discovery_interval: Duration,
    pub restart: RestartPolicy,
    pub results: Option<mpsc::Sender<JobResult>>,
}

impl SupervisorConfig {
    /// One broker on the template's tube.
    pub fn new(template: BrokerConfig) -> Self {
        Self {
            tubes: vec![template.tube.clone()],
            template,
            per_tube: 1,
            all_tubes: false,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            restart: RestartPolicy::default(),
            results: None,
        }
    }

    /// Serve these tubes instead of the template's.
    pub fn with_tubes(mut self, tubes: Vec<TubeName>) -> Self {
        self.tubes = tubes;
        self
    }

    /// Set the number of brokers per tube (at least one).
    pub fn with_per_tube(mut self, per_tube: usize) -> Self {
        self.per_tube = per_tube.max(1);
        self
    }

    /// Discover and serve every tube on the server.
    pub fn all_tubes(mut self) -> Self {
        self.all_tubes = true;
        self
    }

    /// Set the tube discovery interval.
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Set the restart policy.
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Forward every broker's results to `results`.
    pub fn with_results(mut self, results: mpsc::Sender<JobResult>) -> Self {
        self.results = Some(results);
        self
    }
}

/// Supervisor actor arguments.
pub struct SupervisorArgs<C> {
    pub connector: Arc<C>,
    pub config: SupervisorConfig,
    pub exit: oneshot::Sender<Result<(), SupervisorError>>,
}

struct RunningBroker {
    info: BrokerInfo,
    actor: ActorRef<BrokerMessage>,
}

/// State for the supervisor actor.
pub struct SupervisorState<C: Connect> {
    connector: Arc<C>,
    config: SupervisorConfig,
    brokers: HashMap<ActorId, RunningBroker>,
    /// Tubes that have been given brokers.
    served: HashSet<TubeName>,
    failures: HashMap<TubeName, u32>,
    pending_restarts: usize,
    /// Default-tube connection used for `list-tubes`.
    discovery: Option<C::Queue>,
    ticker: Option<JoinHandle<()>>,
    exit: Option<oneshot::Sender<Result<(), SupervisorError>>>,
    stopping: bool,
}

impl<C: Connect> SupervisorState<C> {
    fn new(args: SupervisorArgs<C>) -> Self {
        Self {
            connector: args.connector,
            config: args.config,
            brokers: HashMap::new(),
            served: HashSet::new(),
            failures: HashMap::new(),
            pending_restarts: 0,
            discovery: None,
            ticker: None,
            exit: Some(args.exit),
            stopping: false,
        }
    }

    fn broker_args(&self, tube: &TubeName) -> BrokerArgs<C> {
        BrokerArgs {
            broker_id: Ulid::new().to_string(),
            connector: self.connector.clone(),
            config: self.config.template.clone().with_tube(tube.clone()),
            results: self.config.results.clone(),
        }
    }

    /// Report the outcome once and stop every broker.
    fn finish(&mut self, outcome: Result<(), SupervisorError>) {
        self.stopping = true;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        for running in self.brokers.values() {
            let _ = running.actor.send_message(BrokerMessage::Shutdown);
        }
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(outcome);
        }
    }
}

async fn spawn_broker<C: Connect>(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState<C>,
    tube: &TubeName,
) -> Result<(), SpawnErr> {
    let args = state.broker_args(tube);
    let name = format!("broker-{}-{}", tube, args.broker_id);
    let broker_id = args.broker_id.clone();

    let (actor, _handle) =
        Actor::spawn_linked(Some(name.clone()), BrokerActor::<C>::new(), args, myself.get_cell())
            .await?;

    state.brokers.insert(
        actor.get_id(),
        RunningBroker {
            info: BrokerInfo {
                name,
                broker_id,
                tube: tube.clone(),
            },
            actor,
        },
    );
    Ok(())
}

async fn serve_tube<C: Connect>(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState<C>,
    tube: &TubeName,
) -> Result<(), SpawnErr> {
    if !state.served.insert(tube.clone()) {
        return Ok(());
    }
    tracing::info!("Serving tube {} with {} broker(s)", tube, state.config.per_tube);
    for _ in 0..state.config.per_tube {
        spawn_broker(myself, state, tube).await?;
    }
    Ok(())
}

/// Fetch the server's tubes over the discovery connection, opening it first
/// if needed. A failed connection is dropped and reopened on the next tick.
async fn discover_tubes<C: Connect>(state: &mut SupervisorState<C>) -> Option<Vec<TubeName>> {
    if state.discovery.is_none() {
        match state.connector.connect(&TubeName::default()).await {
            Ok(queue) => state.discovery = Some(queue),
            Err(e) => {
                tracing::warn!("Tube discovery could not connect: {}", e);
                return None;
            }
        }
    }

    let queue = state.discovery.as_mut()?;
    match queue.list_tubes().await {
        Ok(tubes) => Some(tubes),
        Err(e) => {
            tracing::warn!("Tube discovery failed: {}", e);
            state.discovery = None;
            None
        }
    }
}

/// Keeps brokers running and replaces the ones that fail.
pub struct Supervisor<C>(PhantomData<fn() -> C>);

impl<C> Supervisor<C> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C> Default for Supervisor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connect> Actor for Supervisor<C> {
    type Msg = SupervisorMessage;
    type State = SupervisorState<C>;
    type Arguments = SupervisorArgs<C>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting broker supervisor");
        Ok(SupervisorState::new(args))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for tube in state.config.tubes.clone() {
            if let Err(e) = serve_tube(&myself, state, &tube).await {
                tracing::error!("Failed to start broker for tube {}: {}", tube, e);
                state.finish(Err(e.into()));
                myself.stop(None);
                return Ok(());
            }
        }

        if state.config.all_tubes {
            let myself_clone = myself.clone();
            let period = state.config.discovery_interval;
            state.ticker = Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                        break;
                    }
                }
            }));
        } else if state.brokers.is_empty() {
            tracing::warn!("No tubes to serve");
            state.finish(Ok(()));
            myself.stop(None);
        }

        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Tick => {
                if state.stopping {
                    return Ok(());
                }
                let Some(tubes) = discover_tubes(state).await else {
                    return Ok(());
                };
                for tube in tubes {
                    if let Err(e) = serve_tube(&myself, state, &tube).await {
                        tracing::error!("Failed to start broker for tube {}: {}", tube, e);
                        state.finish(Err(e.into()));
                        myself.stop(None);
                        return Ok(());
                    }
                }
            }

            SupervisorMessage::Respawn { tube } => {
                state.pending_restarts = state.pending_restarts.saturating_sub(1);
                if state.stopping {
                    return Ok(());
                }
                tracing::info!("Restarting broker for tube {}", tube);
                if let Err(e) = spawn_broker(&myself, state, &tube).await {
                    tracing::error!("Failed to restart broker for tube {}: {}", tube, e);
                    state.finish(Err(e.into()));
                    myself.stop(None);
                }
            }

            SupervisorMessage::ListBrokers { reply } => {
                let brokers = state
                    .brokers
                    .values()
                    .map(|running| running.info.clone())
                    .collect();
                let _ = reply.send(brokers);
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.finish(Ok(()));
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, err) => {
                let Some(running) = state.brokers.remove(&cell.get_id()) else {
                    return Ok(());
                };
                let tube = running.info.tube;
                tracing::warn!("Broker {} failed: {}", running.info.name, err);
                if state.stopping {
                    return Ok(());
                }

                let failures = state.failures.entry(tube.clone()).or_insert(0);
                *failures += 1;
                let failures = *failures;

                if failures > state.config.restart.max_restarts {
                    tracing::error!(
                        "Giving up on tube {} after {} broker failures",
                        tube,
                        failures
                    );
                    state.finish(Err(SupervisorError::RestartLimit { tube, failures }));
                    myself.stop(None);
                    return Ok(());
                }

                state.pending_restarts += 1;
                let delay = state.config.restart.delay;
                let myself_clone = myself.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = myself_clone.send_message(SupervisorMessage::Respawn { tube });
                });
            }

            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(running) = state.brokers.remove(&cell.get_id()) {
                    tracing::info!("Broker {} terminated: {:?}", running.info.name, reason);
                }
                if state.brokers.is_empty()
                    && state.pending_restarts == 0
                    && !state.config.all_tubes
                    && !state.stopping
                {
                    tracing::info!("All brokers finished");
                    state.finish(Ok(()));
                    myself.stop(None);
                }
            }

            _ => {}
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.finish(Err(SupervisorError::Aborted));
        Ok(())
    }
}

/// A started supervisor.
pub struct SupervisorHandle {
    actor: ActorRef<SupervisorMessage>,
    join: JoinHandle<()>,
    exit: oneshot::Receiver<Result<(), SupervisorError>>,
}

impl SupervisorHandle {
    pub fn actor(&self) -> &ActorRef<SupervisorMessage> {
        &self.actor
    }

    /// Wait for the supervisor to stop and return its outcome.
    pub async fn wait(self) -> Result<(), SupervisorError> {
        let outcome = self.exit.await.unwrap_or(Err(SupervisorError::Aborted));
        let _ = self.join.await;
        outcome
    }
}

/// Start a supervisor that connects brokers through `connector`.
pub async fn start_supervisor<C: Connect>(
    connector: C,
    config: SupervisorConfig,
) -> Result<SupervisorHandle, SupervisorError> {
    let (exit_tx, exit_rx) = oneshot::channel();
    let args = SupervisorArgs {
        connector: Arc::new(connector),
        config,
        exit: exit_tx,
    };

    let (actor, join) = Actor::spawn(None, Supervisor::<C>::new(), args).await?;

    Ok(SupervisorHandle {
        actor,
        join,
        exit: exit_rx,
    })
}
