use super::orchestrator::Backends;
use super::state::record_state;
use super::supervisor::supervise;
use super::{ComponentState, OndemandOrchestrator, ShutdownReason};
use crate::cluster::{ClusterController, CommandClusterController};
use crate::config::{
    ClusterBackend, ClusterConfig, ControllerConfig, DemandConfig, StateBackend, StateConfig,
};
use crate::demand::{DemandSource, QueryLogDemandSource};
use crate::error::Result;
use crate::events::{EventBus, EventFilter, LifecycleEventKind};
use crate::lifecycle::RecoveryOutcome;
use crate::notify::{channels_from_config, MessageFormatter, NotificationDispatcher, RetryPolicy};
use crate::probe::{ActivityProbe, RconProbe};
use crate::store::{FileStateStore, StateStore};
use std::sync::Arc;
use tracing::{error, info, warn};

impl Backends {
    /// Build every backend the configuration names
    pub async fn from_config(config: &ControllerConfig) -> Result<Self> {
        let store = build_store(&config.state, &config.cluster.region).await?;
        let cluster = build_cluster(&config.cluster).await?;
        let probe: Arc<dyn ActivityProbe> = Arc::new(RconProbe::new(&config.probe));

        let channels = channels_from_config(&config.notify).await?;
        let dispatcher = NotificationDispatcher::new(
            channels,
            RetryPolicy::from_config(&config.notify),
            MessageFormatter::from_config(&config.notify)?,
            EventBus::default(),
        );

        info!(
            store = %store.describe(),
            cluster = %cluster.describe(),
            probe = %probe.describe(),
            "Backends initialized"
        );

        Ok(Self {
            store,
            cluster,
            probe,
            dispatcher: Arc::new(dispatcher),
        })
    }
}

async fn build_store(config: &StateConfig, region: &str) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StateBackend::File => Ok(Arc::new(FileStateStore::new(&config.path)?)),
        #[cfg(feature = "aws")]
        StateBackend::Dynamodb => Ok(Arc::new(
            crate::store::DynamoStateStore::from_env(&config.table, &config.key, region).await,
        )),
        #[cfg(not(feature = "aws"))]
        StateBackend::Dynamodb => {
            let _ = region;
            Err(config::ConfigError::Message(
                "state.backend = dynamodb requires the aws feature".to_string(),
            )
            .into())
        }
    }
}

async fn build_cluster(config: &ClusterConfig) -> Result<Arc<dyn ClusterController>> {
    match config.backend {
        #[cfg(feature = "aws")]
        ClusterBackend::Aws => Ok(Arc::new(
            crate::cluster::EcsClusterController::from_env(
                &config.name,
                &config.service,
                &config.region,
            )
            .await,
        )),
        #[cfg(not(feature = "aws"))]
        ClusterBackend::Aws => Err(config::ConfigError::Message(
            "cluster.backend = aws requires the aws feature".to_string(),
        )
        .into()),
        ClusterBackend::Command => Ok(Arc::new(CommandClusterController::new(config)?)),
    }
}

/// Demand sources enabled by the configuration
pub(super) fn demand_sources_from_config(config: &DemandConfig) -> Vec<Arc<dyn DemandSource>> {
    let mut sources: Vec<Arc<dyn DemandSource>> = Vec::new();

    if config.http_enabled {
        #[cfg(feature = "http")]
        sources.push(Arc::new(crate::demand::HttpDemandSource::new(&config.http_address)));
        #[cfg(not(feature = "http"))]
        warn!("demand.http_enabled is set but the http feature is not compiled in");
    }

    if let Some(source) = QueryLogDemandSource::from_config(config) {
        sources.push(Arc::new(source));
    }

    if sources.is_empty() {
        warn!("No demand sources configured; launches only happen through the CLI");
    }
    sources
}

impl OndemandOrchestrator {
    /// Register components and run the recovery pass
    pub async fn initialize(&mut self) -> Result<RecoveryOutcome> {
        info!("Initializing on-demand controller");

        self.set_component_state("supervisor", ComponentState::Stopped)
            .await;
        for source in &self.demand_sources {
            self.set_component_state(source.name(), ComponentState::Stopped)
                .await;
        }

        let outcome = self.recover().await?;
        info!(?outcome, "Recovery pass complete");
        Ok(outcome)
    }

    /// Spawn the watchdog supervisor and every demand source
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting on-demand controller");

        // Subscribe before any source can trigger a launch
        let launched = self.backends.dispatcher.subscribe(
            EventFilter::Kinds(vec![LifecycleEventKind::Launched]),
            "supervisor",
        );
        let launcher = Arc::clone(&self.launcher);
        let watchdog = Arc::clone(&self.watchdog);
        let check_interval = self.timings.poll_interval;
        let token = self.cancellation_token.child_token();
        let states = Arc::clone(&self.component_states);

        self.set_component_state("supervisor", ComponentState::Running)
            .await;
        self.tasks.spawn(async move {
            supervise(launcher, watchdog, launched, check_interval, token).await;
            record_state(&states, "supervisor", ComponentState::Stopped).await;
        });

        for source in &self.demand_sources {
            let name = source.name().to_string();
            record_state(&self.component_states, &name, ComponentState::Starting).await;

            let source = Arc::clone(source);
            let task_name = name.clone();
            let launcher = Arc::clone(&self.launcher);
            let token = self.cancellation_token.child_token();
            let states = Arc::clone(&self.component_states);
            let shutdown_sender = Arc::clone(&self.shutdown_sender);

            self.tasks.spawn(async move {
                let name = task_name;
                record_state(&states, &name, ComponentState::Running).await;
                match source.run(launcher, token).await {
                    Ok(()) => {
                        record_state(&states, &name, ComponentState::Stopped).await;
                        info!("{} demand source stopped", name);
                    }
                    Err(e) => {
                        record_state(&states, &name, ComponentState::Failed).await;
                        error!("{} demand source failed: {}", name, e);
                        if let Some(sender) = shutdown_sender.lock().await.take() {
                            let _ = sender.send(ShutdownReason::Error(format!("{}: {}", name, e)));
                        }
                    }
                }
            });
            info!("{} demand source started", name);
        }

        info!("On-demand controller started");
        Ok(())
    }
}
