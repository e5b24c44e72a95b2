//! The launch / watch / shutdown protocol.

mod launcher;
mod recovery;
mod watchdog;

#[cfg(test)]
mod tests;

pub use launcher::{LaunchClaim, LaunchOutcome, Launcher, PendingLaunch};
pub use recovery::{recover, RecoveryOutcome};
pub use watchdog::{evaluate, observe, ShutdownReport, WatchOutcome, WatchPhase, Watchdog};

use crate::config::LifecycleConfig;
use std::time::Duration;

/// Timing knobs shared by the launcher, watchdog and recovery pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    pub startup_grace: Duration,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub max_consecutive_probe_failures: u32,
    pub cluster_poll_interval: Duration,
    pub shutdown_deadline: Duration,
    pub recovery_margin: Duration,
}

impl LifecycleTimings {
    pub fn lock_ttl(&self) -> Duration {
        self.shutdown_deadline.max(self.startup_grace) + self.recovery_margin
    }

    /// Age after which a Starting record is considered abandoned
    pub fn stale_starting_after(&self) -> Duration {
        self.startup_grace + self.recovery_margin
    }

    /// Age after which a Stopping record is considered abandoned
    pub fn stale_stopping_after(&self) -> Duration {
        self.shutdown_deadline + self.recovery_margin
    }
}

impl From<&LifecycleConfig> for LifecycleTimings {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            startup_grace: config.startup_grace(),
            idle_timeout: config.idle_timeout(),
            poll_interval: config.poll_interval(),
            max_consecutive_probe_failures: config.max_consecutive_probe_failures,
            cluster_poll_interval: config.cluster_poll_interval(),
            shutdown_deadline: config.shutdown_deadline(),
            recovery_margin: config.recovery_margin(),
        }
    }
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

/// Human-friendly rendering for notification details
pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{}s", s),
        (0, m, 0) => format!("{}m", m),
        (0, m, s) => format!("{}m{}s", m, s),
        (h, m, _) => format!("{}h{}m", h, m),
    }
}
