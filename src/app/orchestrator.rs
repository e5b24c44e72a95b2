use super::state::ComponentStates;
use super::types::ShutdownReason;
use crate::clock::Clock;
use crate::cluster::ClusterController;
use crate::config::ControllerConfig;
use crate::demand::DemandSource;
use crate::error::Result;
use crate::lifecycle::{recover, Launcher, LifecycleTimings, RecoveryOutcome, Watchdog};
use crate::notify::NotificationDispatcher;
use crate::probe::ActivityProbe;
use crate::store::{owner_id, StateCoordinator, StateStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// External collaborators the controller drives
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn StateStore>,
    pub cluster: Arc<dyn ClusterController>,
    pub probe: Arc<dyn ActivityProbe>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

/// Wires the launcher, watchdog and demand sources into one long-running process
pub struct OndemandOrchestrator {
    pub(super) config: ControllerConfig,
    pub(super) timings: LifecycleTimings,
    pub(super) clock: Clock,
    pub(super) backends: Backends,
    pub(super) launcher: Arc<Launcher>,
    pub(super) watchdog: Arc<Watchdog>,
    pub(super) demand_sources: Vec<Arc<dyn DemandSource>>,

    // Lifecycle management
    pub(super) component_states: Arc<ComponentStates>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) tasks: TaskTracker,
}

impl OndemandOrchestrator {
    /// Create an orchestrator with backends built from the configuration
    pub async fn new(config: ControllerConfig) -> Result<Self> {
        let backends = Backends::from_config(&config).await?;
        let demand_sources = super::startup::demand_sources_from_config(&config.demand);
        let mut orchestrator = Self::with_backends(config, backends, Clock::new());
        orchestrator.demand_sources = demand_sources;
        Ok(orchestrator)
    }

    /// Create an orchestrator around existing backends, with no demand sources
    pub fn with_backends(config: ControllerConfig, backends: Backends, clock: Clock) -> Self {
        let timings = LifecycleTimings::from(&config.lifecycle);

        let launcher = Arc::new(Launcher::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.cluster),
            Arc::clone(&backends.dispatcher),
            timings,
            clock,
        ));
        let watchdog = Arc::new(Watchdog::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.cluster),
            Arc::clone(&backends.probe),
            Arc::clone(&backends.dispatcher),
            timings,
            clock,
        ));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            timings,
            clock,
            backends,
            launcher,
            watchdog,
            demand_sources: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_demand_source(mut self, source: Arc<dyn DemandSource>) -> Self {
        self.demand_sources.push(source);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn launcher(&self) -> Arc<Launcher> {
        Arc::clone(&self.launcher)
    }

    pub fn watchdog(&self) -> Arc<Watchdog> {
        Arc::clone(&self.watchdog)
    }

    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        Arc::clone(&self.backends.dispatcher)
    }

    /// Run the recovery pass once against the shared store
    pub async fn recover(&self) -> Result<RecoveryOutcome> {
        let coordinator = StateCoordinator::new(
            Arc::clone(&self.backends.store),
            self.clock,
            owner_id("recovery"),
            self.timings.lock_ttl(),
        );
        recover(
            &coordinator,
            self.backends.cluster.as_ref(),
            self.backends.dispatcher.as_ref(),
            &self.timings,
        )
        .await
    }
}
