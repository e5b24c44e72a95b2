use super::{format_duration, LifecycleTimings};
use crate::clock::Clock;
use crate::cluster::{wait_for_count, ClusterController, Convergence, TaskCount};
use crate::error::{ControllerError, Result};
use crate::events::{LifecycleEvent, LifecycleEventKind};
use crate::notify::NotificationDispatcher;
use crate::probe::ActivityProbe;
use crate::state::{ActivityRecord, DesiredState, StateRecord};
use crate::store::{owner_id, StateCoordinator, StateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the current cycle stands from the watchdog's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchPhase {
    /// Recently launched; idle time is tracked but never acted on
    Grace,
    Active,
    IdleCounting,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Running count reached zero before the deadline
    pub confirmed: bool,
    pub last_seen: Option<u32>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    ShutDown(ShutdownReport),
    /// The record left Running without this watchdog's involvement
    NotRunning(DesiredState),
    Cancelled,
}

/// Fold one probe result into the activity record.
///
/// `reading` is `None` when the probe failed. Failures below `max_failures`
/// leave the idle timer alone; from the threshold on, the streak counts as
/// idle time starting at its first failure.
pub fn observe(
    previous: &ActivityRecord,
    reading: Option<u32>,
    now: DateTime<Utc>,
    max_failures: u32,
) -> ActivityRecord {
    let mut next = previous.clone();
    match reading {
        Some(count) => {
            next.active_count = count;
            next.consecutive_probe_failures = 0;
            next.failing_since = None;
            if count > 0 {
                next.last_active_at = now;
                next.idle_since = None;
            } else {
                next.idle_since = previous.idle_since.or(Some(now));
            }
        }
        None => {
            next.consecutive_probe_failures = previous.consecutive_probe_failures.saturating_add(1);
            next.failing_since = previous.failing_since.or(Some(now));
            if next.consecutive_probe_failures >= max_failures {
                next.idle_since = previous.idle_since.or(next.failing_since);
            }
        }
    }
    next
}

/// Classify a Running record at `now`
pub fn evaluate(
    record: &StateRecord,
    now: DateTime<Utc>,
    timings: &LifecycleTimings,
) -> WatchPhase {
    let launched_at = record.launched_at.unwrap_or(record.changed_at);
    let since_launch = (now - launched_at).to_std().unwrap_or_default();
    if since_launch < timings.startup_grace {
        return WatchPhase::Grace;
    }

    match record.activity.idle_since {
        None => WatchPhase::Active,
        Some(idle_since) => {
            let idle_for = (now - idle_since).to_std().unwrap_or_default();
            if idle_for >= timings.idle_timeout {
                WatchPhase::ShuttingDown
            } else {
                WatchPhase::IdleCounting
            }
        }
    }
}

/// Polls the workload while it runs and stops it once idle long enough
pub struct Watchdog {
    coordinator: StateCoordinator,
    cluster: Arc<dyn ClusterController>,
    probe: Arc<dyn ActivityProbe>,
    dispatcher: Arc<NotificationDispatcher>,
    timings: LifecycleTimings,
}

impl Watchdog {
    pub fn new(
        store: Arc<dyn StateStore>,
        cluster: Arc<dyn ClusterController>,
        probe: Arc<dyn ActivityProbe>,
        dispatcher: Arc<NotificationDispatcher>,
        timings: LifecycleTimings,
        clock: Clock,
    ) -> Self {
        let coordinator =
            StateCoordinator::new(store, clock, owner_id("watchdog"), timings.lock_ttl());
        Self {
            coordinator,
            cluster,
            probe,
            dispatcher,
            timings,
        }
    }

    pub fn owner(&self) -> &str {
        self.coordinator.owner()
    }

    /// Watch the current cycle until it shuts down, leaves Running, or `cancel` fires.
    ///
    /// Cancellation is only observed between polls; a shutdown sequence
    /// that has begun always runs to its end.
    pub async fn run(&self, cancel: CancellationToken) -> Result<WatchOutcome> {
        let mut ticker = interval(self.timings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_phase = None;

        info!(
            owner = %self.owner(),
            probe = %self.probe.describe(),
            poll = ?self.timings.poll_interval,
            idle_timeout = ?self.timings.idle_timeout,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Watchdog cancelled");
                    return Ok(WatchOutcome::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            match self.poll_once(&mut last_phase).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => warn!("Watchdog poll failed: {}", e),
                Err(e) => {
                    error!("Watchdog stopping on unrecoverable error: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn poll_once(&self, last_phase: &mut Option<WatchPhase>) -> Result<Option<WatchOutcome>> {
        let record = self.coordinator.read().await?;
        if record.desired != DesiredState::Running {
            info!(desired = %record.desired, "Workload no longer running, watchdog exiting");
            return Ok(Some(WatchOutcome::NotRunning(record.desired)));
        }

        let reading = match self.probe.query().await {
            Ok(reading) => Some(reading.active_count),
            Err(e) => {
                warn!(
                    failures = record.activity.consecutive_probe_failures + 1,
                    threshold = self.timings.max_consecutive_probe_failures,
                    "Activity probe failed: {}",
                    e
                );
                None
            }
        };

        let now = self.coordinator.clock().now();
        let max_failures = self.timings.max_consecutive_probe_failures;
        let updated = match self
            .coordinator
            .update_in(DesiredState::Running, |record| {
                record.activity = observe(&record.activity, reading, now, max_failures);
            })
            .await
        {
            Ok(updated) => updated,
            Err(ControllerError::StateConflict { actual, .. }) => {
                return Ok(Some(WatchOutcome::NotRunning(actual)));
            }
            Err(e) => return Err(e),
        };

        let phase = evaluate(&updated, now, &self.timings);
        if *last_phase != Some(phase) {
            info!(?phase, active = updated.activity.active_count, "Watch phase changed");
            *last_phase = Some(phase);
        } else {
            debug!(?phase, active = updated.activity.active_count, "Activity polled");
        }

        if phase != WatchPhase::ShuttingDown {
            return Ok(None);
        }

        let idle_for = updated
            .activity
            .idle_since
            .map(|since| (now - since).to_std().unwrap_or_default())
            .unwrap_or_default();
        let reason = format!("idle for {}", format_duration(idle_for));

        match self.shutdown(&reason).await {
            Ok(Some(report)) => Ok(Some(WatchOutcome::ShutDown(report))),
            // Lock busy; the next poll tries again
            Ok(None) => Ok(None),
            Err(ControllerError::StateConflict { actual, .. }) => {
                Ok(Some(WatchOutcome::NotRunning(actual)))
            }
            Err(e) => Err(e),
        }
    }

    /// Operator-initiated shutdown of a Running workload, skipping idle evaluation
    pub async fn force_stop(&self, reason: &str) -> Result<ShutdownReport> {
        let record = self.coordinator.read().await?;
        if record.desired != DesiredState::Running {
            return Err(ControllerError::InvalidTransition {
                from: record.desired,
                to: DesiredState::Stopping,
            });
        }

        self.shutdown(reason).await?.ok_or_else(|| {
            ControllerError::component("watchdog", "transition lock is held by another owner")
        })
    }

    /// Running -> Stopping -> Stopped under the transition lock.
    ///
    /// Returns `None` without side effects when the lock is held elsewhere.
    async fn shutdown(&self, reason: &str) -> Result<Option<ShutdownReport>> {
        if self.coordinator.try_acquire_lock().await?.is_none() {
            warn!("Shutdown deferred, transition lock busy");
            return Ok(None);
        }

        if let Err(e) = self
            .coordinator
            .transition(DesiredState::Running, DesiredState::Stopping, |_| {})
            .await
        {
            if let Err(release_err) = self.coordinator.release_lock().await {
                warn!("Failed to release transition lock: {}", release_err);
            }
            return Err(e);
        }

        info!(reason, "Shutting down workload");
        self.publish(LifecycleEvent::new(
            LifecycleEventKind::ShuttingDown,
            self.coordinator.clock().now(),
            reason,
        ));

        if let Err(e) = self.cluster.scale_to(TaskCount::Zero).await {
            error!("Scale-down request failed: {}", e);
        }

        let convergence = wait_for_count(
            self.cluster.as_ref(),
            TaskCount::Zero,
            self.timings.shutdown_deadline,
            self.timings.cluster_poll_interval,
        )
        .await;

        let (confirmed, last_seen) = match convergence {
            Convergence::Reached => (true, Some(0)),
            Convergence::TimedOut { last_seen } => (false, last_seen),
        };

        // Stopped is forced either way; the lock goes with the same swap
        self.coordinator
            .transition(DesiredState::Stopping, DesiredState::Stopped, |record| {
                record.lock = None;
                record.launched_at = None;
                record.activity.active_count = 0;
                record.activity.idle_since = None;
                record.activity.failing_since = None;
                record.activity.consecutive_probe_failures = 0;
            })
            .await?;

        let now = self.coordinator.clock().now();
        let event = if confirmed {
            LifecycleEvent::new(LifecycleEventKind::Shutdown, now, reason)
        } else {
            let incomplete = ControllerError::ShutdownIncomplete {
                running: last_seen.unwrap_or(1),
                deadline: self.timings.shutdown_deadline,
            };
            error!("{}", incomplete);
            LifecycleEvent::new(LifecycleEventKind::Shutdown, now, incomplete.to_string())
                .degraded()
        };
        self.publish(event);

        Ok(Some(ShutdownReport {
            confirmed,
            last_seen,
            reason: reason.to_string(),
        }))
    }

    fn publish(&self, event: LifecycleEvent) {
        self.dispatcher.publish(event);
    }
}
