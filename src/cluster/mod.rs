//! Control over the workload's task count.

mod command;
pub mod mock;

#[cfg(feature = "aws")]
mod ecs;

pub use command::CommandClusterController;
pub use mock::MockClusterController;

#[cfg(feature = "aws")]
pub use ecs::EcsClusterController;

use crate::error::ClusterError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// The only task counts the controller ever asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCount {
    Zero,
    One,
}

impl TaskCount {
    pub fn as_u32(self) -> u32 {
        match self {
            TaskCount::Zero => 0,
            TaskCount::One => 1,
        }
    }
}

impl fmt::Display for TaskCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Orchestration platform hosting the workload
#[async_trait]
pub trait ClusterController: Send + Sync {
    /// Set the desired task count
    async fn scale_to(&self, count: TaskCount) -> Result<(), ClusterError>;

    /// Number of tasks currently running
    async fn running_count(&self) -> Result<u32, ClusterError>;

    fn describe(&self) -> String;
}

/// Result of waiting for the running count to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Reached,
    /// Deadline passed; carries the last count observed, if any
    TimedOut { last_seen: Option<u32> },
}

/// Poll `running_count` until it equals `target` or `timeout` elapses.
///
/// The first check happens immediately. Errors from the controller are
/// logged and polling continues.
pub async fn wait_for_count(
    cluster: &dyn ClusterController,
    target: TaskCount,
    timeout: Duration,
    poll_interval: Duration,
) -> Convergence {
    let deadline = Instant::now() + timeout;
    let mut last_seen = None;

    loop {
        match cluster.running_count().await {
            Ok(count) => {
                debug!(count, target = target.as_u32(), "running count polled");
                last_seen = Some(count);
                if count == target.as_u32() {
                    return Convergence::Reached;
                }
            }
            Err(e) => {
                warn!("Failed to read running count from {}: {}", cluster.describe(), e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Convergence::TimedOut { last_seen };
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}
