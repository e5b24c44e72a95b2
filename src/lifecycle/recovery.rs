use super::{format_duration, LifecycleTimings};
use crate::cluster::{ClusterController, TaskCount};
use crate::error::{ControllerError, Result};
use crate::events::{LifecycleEvent, LifecycleEventKind};
use crate::notify::NotificationDispatcher;
use crate::state::DesiredState;
use crate::store::StateCoordinator;
use tracing::{info, warn};

/// What the startup recovery pass found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing to repair
    Clean(DesiredState),
    /// A fresh transition is still in flight elsewhere; left alone
    InProgress(DesiredState),
    /// Abandoned launch normalized to Stopped
    RecoveredStaleStart,
    /// Abandoned shutdown normalized to Stopped
    RecoveredStaleStop,
}

/// Normalize transitional states left behind by a crashed process.
///
/// Starting older than grace + margin and Stopping older than the shutdown
/// deadline + margin are driven to Stopped, with a best-effort scale-down so
/// no task outlives its record.
pub async fn recover(
    coordinator: &StateCoordinator,
    cluster: &dyn ClusterController,
    dispatcher: &NotificationDispatcher,
    timings: &LifecycleTimings,
) -> Result<RecoveryOutcome> {
    let record = coordinator.read().await?;
    let now = coordinator.clock().now();
    let age = record.age(now);

    let (stale_after, failed_kind) = match record.desired {
        DesiredState::Starting => {
            (timings.stale_starting_after(), LifecycleEventKind::LaunchFailed)
        }
        DesiredState::Stopping => (timings.stale_stopping_after(), LifecycleEventKind::Shutdown),
        stable => {
            info!(state = %stable, "Recovery pass: state is stable");
            return Ok(RecoveryOutcome::Clean(stable));
        }
    };

    if age < stale_after {
        info!(state = %record.desired, age = ?age, "Recovery pass: transition still in flight");
        return Ok(RecoveryOutcome::InProgress(record.desired));
    }

    if coordinator.try_acquire_lock().await?.is_none() {
        info!(
            state = %record.desired,
            "Recovery pass: transition lock is live, leaving state alone"
        );
        return Ok(RecoveryOutcome::InProgress(record.desired));
    }

    warn!(
        state = %record.desired,
        age = %format_duration(age),
        "Recovery pass: normalizing stale transitional state"
    );

    if let Err(e) = cluster.scale_to(TaskCount::Zero).await {
        warn!("Recovery scale-down failed: {}", e);
    }

    let from = record.desired;
    match coordinator
        .transition(from, DesiredState::Stopped, |record| {
            record.lock = None;
            record.launched_at = None;
            record.activity.idle_since = None;
            record.activity.failing_since = None;
            record.activity.consecutive_probe_failures = 0;
        })
        .await
    {
        Ok(_) => {}
        Err(e @ ControllerError::StateConflict { .. }) => {
            warn!("Recovery pass raced with another writer: {}", e);
            if let Err(release_err) = coordinator.release_lock().await {
                warn!("Failed to release transition lock: {}", release_err);
            }
            return Ok(RecoveryOutcome::InProgress(coordinator.read().await?.desired));
        }
        Err(e) => return Err(e),
    }

    let detail = format!("abandoned {} recovered after {}", from, format_duration(age));
    let mut event = LifecycleEvent::new(failed_kind, now, detail);
    if failed_kind == LifecycleEventKind::Shutdown {
        event = event.degraded();
    }
    dispatcher.publish(event);

    Ok(match from {
        DesiredState::Starting => RecoveryOutcome::RecoveredStaleStart,
        _ => RecoveryOutcome::RecoveredStaleStop,
    })
}
