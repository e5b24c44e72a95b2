use crate::error::Result;
use crate::events::EventReceiver;
use crate::lifecycle::{Launcher, WatchOutcome, Watchdog};
use crate::state::DesiredState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keep exactly one watchdog alive while the workload is Running.
///
/// Wakes on every Launched event and on a periodic check, so a cycle
/// started by another process (or found Running at startup) is picked up too.
pub(super) async fn supervise(
    launcher: Arc<Launcher>,
    watchdog: Arc<Watchdog>,
    launched: EventReceiver,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    let mut launched = Some(launched);
    let mut ticker = interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut current: Option<JoinHandle<Result<WatchOutcome>>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = next_launch(&mut launched) => debug!("Launch observed"),
            _ = ticker.tick() => {}
        }

        if current.as_ref().is_some_and(|handle| !handle.is_finished()) {
            continue;
        }
        if let Some(handle) = current.take() {
            report(handle.await);
        }

        match launcher.status().await {
            Ok(record) if record.desired == DesiredState::Running => {
                info!(watchdog = %watchdog.owner(), "Workload running, starting watchdog");
                let watchdog = Arc::clone(&watchdog);
                let token = cancel.child_token();
                current = Some(tokio::spawn(async move { watchdog.run(token).await }));
            }
            Ok(record) => debug!(desired = %record.desired, "No watchdog needed"),
            Err(e) => warn!("Supervisor could not read state: {}", e),
        }
    }

    // A shutdown already under way finishes before the process exits
    if let Some(handle) = current {
        report(handle.await);
    }
    info!("Watchdog supervisor stopped");
}

async fn next_launch(receiver: &mut Option<EventReceiver>) {
    let Some(rx) = receiver.as_mut() else {
        return std::future::pending().await;
    };
    if let Err(e) = rx.recv().await {
        warn!("Launch events unavailable, relying on periodic checks: {}", e);
        *receiver = None;
    }
}

fn report(result: std::result::Result<Result<WatchOutcome>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(WatchOutcome::ShutDown(report))) if report.confirmed => {
            info!(reason = %report.reason, "Cycle ended with shutdown")
        }
        Ok(Ok(WatchOutcome::ShutDown(report))) => {
            warn!(
                reason = %report.reason,
                last_seen = ?report.last_seen,
                "Cycle ended, shutdown unconfirmed"
            )
        }
        Ok(Ok(WatchOutcome::NotRunning(desired))) => info!(%desired, "Cycle ended elsewhere"),
        Ok(Ok(WatchOutcome::Cancelled)) => debug!("Watchdog cancelled"),
        Ok(Err(e)) => error!("Watchdog failed: {}", e),
        Err(e) => error!("Watchdog task panicked: {}", e),
    }
}
