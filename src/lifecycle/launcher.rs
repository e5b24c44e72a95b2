use super::{format_duration, LifecycleTimings};
use crate::clock::Clock;
use crate::cluster::{wait_for_count, ClusterController, Convergence, TaskCount};
use crate::demand::DemandSignal;
use crate::error::{ControllerError, Result};
use crate::events::{LifecycleEvent, LifecycleEventKind};
use crate::notify::NotificationDispatcher;
use crate::state::{ActivityRecord, DesiredState, StateRecord};
use crate::store::{owner_id, StateCoordinator, StateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a demand signal amounted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// This call started the workload and saw it come up
    Launched,
    AlreadyRunning,
    AlreadyStarting,
    /// Another owner holds the transition lock
    TransitionInProgress,
    /// A shutdown is in progress; the signal was dropped
    Busy,
    Failed { reason: String },
}

impl LaunchOutcome {
    /// False only when the caller should retry or report an error
    pub fn is_success(&self) -> bool {
        !matches!(self, LaunchOutcome::Busy | LaunchOutcome::Failed { .. })
    }
}

/// A launch that has moved the record to Starting but not yet scaled up
#[derive(Debug, Clone)]
pub struct PendingLaunch {
    pub signal: DemandSignal,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum LaunchClaim {
    Claimed(PendingLaunch),
    Skipped(LaunchOutcome),
}

/// Turns demand signals into at most one scale-up per idle period
pub struct Launcher {
    coordinator: StateCoordinator,
    cluster: Arc<dyn ClusterController>,
    dispatcher: Arc<NotificationDispatcher>,
    timings: LifecycleTimings,
}

impl Launcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        cluster: Arc<dyn ClusterController>,
        dispatcher: Arc<NotificationDispatcher>,
        timings: LifecycleTimings,
        clock: Clock,
    ) -> Self {
        let coordinator =
            StateCoordinator::new(store, clock, owner_id("launcher"), timings.lock_ttl());
        Self {
            coordinator,
            cluster,
            dispatcher,
            timings,
        }
    }

    pub fn owner(&self) -> &str {
        self.coordinator.owner()
    }

    pub fn clock(&self) -> &Clock {
        self.coordinator.clock()
    }

    /// Stamp a demand signal with this launcher's clock
    pub fn signal(&self, source: &str) -> DemandSignal {
        DemandSignal::new(source, self.clock().now())
    }

    /// Current persisted record
    pub async fn status(&self) -> Result<StateRecord> {
        self.coordinator.read().await
    }

    /// Make sure the workload is (or is becoming) Running.
    ///
    /// Safe to call any number of times concurrently; only the caller that
    /// moves the record from Stopped to Starting performs the scale-up.
    pub async fn ensure_running(&self, signal: DemandSignal) -> Result<LaunchOutcome> {
        match self.claim(signal).await? {
            LaunchClaim::Claimed(pending) => self.complete(pending).await,
            LaunchClaim::Skipped(outcome) => Ok(outcome),
        }
    }

    /// First half of `ensure_running`: decide under the lock whether this call launches
    pub async fn claim(&self, signal: DemandSignal) -> Result<LaunchClaim> {
        // Each call locks under its own id so calls within one process exclude each other too
        let coordinator = self.coordinator.for_owner(owner_id("launcher"));

        let Some(locked) = coordinator.try_acquire_lock().await? else {
            return self.locked_out(&coordinator, &signal).await;
        };

        let claim = match locked.desired {
            DesiredState::Stopped => {
                match coordinator
                    .transition(DesiredState::Stopped, DesiredState::Starting, |record| {
                        record.launched_at = None;
                    })
                    .await
                {
                    Ok(record) => {
                        info!(
                            source = %signal.source,
                            owner = %coordinator.owner(),
                            "Launch claimed"
                        );
                        Ok(LaunchClaim::Claimed(PendingLaunch {
                            signal: signal.clone(),
                            claimed_at: record.changed_at,
                        }))
                    }
                    Err(ControllerError::StateConflict { actual, .. }) => {
                        Ok(LaunchClaim::Skipped(skipped_outcome(actual, &signal)))
                    }
                    Err(e) => Err(e),
                }
            }
            other => Ok(LaunchClaim::Skipped(skipped_outcome(other, &signal))),
        };

        if let Err(e) = coordinator.release_lock().await {
            warn!("Failed to release transition lock: {}", e);
        }
        claim
    }

    /// The lock is held elsewhere. A shutdown holds it from Running to
    /// Stopped, so a Stopping record means the signal is dropped as Busy.
    async fn locked_out(
        &self,
        coordinator: &StateCoordinator,
        signal: &DemandSignal,
    ) -> Result<LaunchClaim> {
        let record = coordinator.read().await?;
        if record.desired == DesiredState::Stopping {
            return Ok(LaunchClaim::Skipped(skipped_outcome(record.desired, signal)));
        }
        debug!(
            source = %signal.source,
            desired = %record.desired,
            "Demand ignored, transition in progress"
        );
        Ok(LaunchClaim::Skipped(LaunchOutcome::TransitionInProgress))
    }

    /// Second half of `ensure_running`: scale up and wait for the task.
    ///
    /// Launching is published only once the scale-up is accepted. A rejected
    /// scale-up is the one path where LaunchFailed has no Launching before
    /// it: no cycle began, and the record goes straight back to Stopped.
    pub async fn complete(&self, pending: PendingLaunch) -> Result<LaunchOutcome> {
        if let Err(e) = self.cluster.scale_to(TaskCount::One).await {
            let reason = format!("scale-up rejected: {}", e);
            error!("{}", reason);
            self.abandon(&reason).await?;
            return Ok(LaunchOutcome::Failed { reason });
        }

        self.publish(
            LifecycleEventKind::Launching,
            format!("requested via {}", pending.signal.source),
        );

        let convergence = wait_for_count(
            self.cluster.as_ref(),
            TaskCount::One,
            self.timings.startup_grace,
            self.timings.cluster_poll_interval,
        )
        .await;

        match convergence {
            Convergence::Reached => {
                let now = self.coordinator.clock().now();
                self.coordinator
                    .transition(DesiredState::Starting, DesiredState::Running, |record| {
                        record.launched_at = Some(now);
                        record.activity = ActivityRecord::fresh(now);
                    })
                    .await?;

                let took = self.coordinator.clock().since(pending.claimed_at);
                info!(took = ?took, "Workload is running");
                self.publish(
                    LifecycleEventKind::Launched,
                    format!("up after {}", format_duration(took)),
                );
                Ok(LaunchOutcome::Launched)
            }
            Convergence::TimedOut { last_seen } => {
                let reason = format!(
                    "no running task after {} (last count {})",
                    format_duration(self.timings.startup_grace),
                    last_seen.map_or_else(|| "unknown".to_string(), |c| c.to_string())
                );
                error!("Launch timed out: {}", reason);
                self.abandon(&reason).await?;

                // Don't leave a half-started task accruing cost
                if let Err(e) = self.cluster.scale_to(TaskCount::Zero).await {
                    warn!("Failed to scale down after launch timeout: {}", e);
                }
                Ok(LaunchOutcome::Failed { reason })
            }
        }
    }

    /// Starting -> Stopped and a LaunchFailed notification
    async fn abandon(&self, reason: &str) -> Result<()> {
        match self
            .coordinator
            .transition(DesiredState::Starting, DesiredState::Stopped, |record| {
                record.launched_at = None;
            })
            .await
        {
            Ok(_) => {
                self.publish(LifecycleEventKind::LaunchFailed, reason.to_string());
                Ok(())
            }
            Err(ControllerError::StateConflict { actual, .. }) => {
                warn!(%actual, "Launch already resolved elsewhere, not rolling back");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn publish(&self, kind: LifecycleEventKind, detail: String) {
        let event = LifecycleEvent::new(kind, self.coordinator.clock().now(), detail);
        self.dispatcher.publish(event);
    }
}

/// Outcome for a demand that finds the record already past Stopped
fn skipped_outcome(desired: DesiredState, signal: &DemandSignal) -> LaunchOutcome {
    match desired {
        DesiredState::Running => LaunchOutcome::AlreadyRunning,
        DesiredState::Starting => LaunchOutcome::AlreadyStarting,
        DesiredState::Stopping => {
            info!(source = %signal.source, "Demand dropped, shutdown in progress");
            LaunchOutcome::Busy
        }
        // Only reachable through a lost race; someone else owns the launch
        DesiredState::Stopped => LaunchOutcome::TransitionInProgress,
    }
}
