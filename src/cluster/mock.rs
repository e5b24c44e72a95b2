use super::{ClusterController, TaskCount};
use crate::error::ClusterError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Simulated cluster for testing without an orchestration platform.
///
/// Tasks appear `start_delay` after a scale-up and disappear `stop_delay`
/// after a scale-down, measured on the tokio clock.
pub struct MockClusterController {
    inner: Mutex<MockCluster>,
    start_delay: Option<Duration>,
    stop_delay: Option<Duration>,
}

struct MockCluster {
    desired: u32,
    running: u32,
    changed_at: Instant,
    scale_calls: Vec<(TaskCount, Instant)>,
    reject_scale: bool,
    fail_counts: bool,
}

impl MockClusterController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockCluster {
                desired: 0,
                running: 0,
                changed_at: Instant::now(),
                scale_calls: Vec::new(),
                reject_scale: false,
                fail_counts: false,
            }),
            start_delay: Some(Duration::ZERO),
            stop_delay: Some(Duration::ZERO),
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// Scale-ups are accepted but no task ever comes up
    pub fn never_starts(mut self) -> Self {
        self.start_delay = None;
        self
    }

    /// Scale-downs are accepted but the task never goes away
    pub fn never_stops(mut self) -> Self {
        self.stop_delay = None;
        self
    }

    /// Start in the given running state, as if launched earlier
    pub fn already_running(self) -> Self {
        {
            let mut inner = self.inner.lock();
            inner.desired = 1;
            inner.running = 1;
        }
        self
    }

    pub fn reject_scale_requests(&self, reject: bool) {
        self.inner.lock().reject_scale = reject;
    }

    pub fn fail_count_requests(&self, fail: bool) {
        self.inner.lock().fail_counts = fail;
    }

    pub fn scale_calls(&self) -> Vec<(TaskCount, Instant)> {
        self.inner.lock().scale_calls.clone()
    }

    pub fn scale_up_count(&self) -> usize {
        self.inner
            .lock()
            .scale_calls
            .iter()
            .filter(|(count, _)| *count == TaskCount::One)
            .count()
    }

    pub fn desired(&self) -> u32 {
        self.inner.lock().desired
    }

    fn settle(&self, inner: &mut MockCluster) {
        if inner.running == inner.desired {
            return;
        }
        let delay = if inner.desired > inner.running {
            self.start_delay
        } else {
            self.stop_delay
        };
        if let Some(delay) = delay {
            if inner.changed_at.elapsed() >= delay {
                inner.running = inner.desired;
            }
        }
    }
}

impl Default for MockClusterController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterController for MockClusterController {
    async fn scale_to(&self, count: TaskCount) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock();
        if inner.reject_scale {
            return Err(ClusterError::ScaleRejected {
                desired: count.as_u32(),
                details: "mock rejection".to_string(),
            });
        }

        self.settle(&mut inner);
        inner.scale_calls.push((count, Instant::now()));
        if inner.desired != count.as_u32() {
            inner.desired = count.as_u32();
            inner.changed_at = Instant::now();
        }
        debug!(desired = inner.desired, "mock cluster scaled");
        Ok(())
    }

    async fn running_count(&self) -> Result<u32, ClusterError> {
        let mut inner = self.inner.lock();
        if inner.fail_counts {
            return Err(ClusterError::Describe {
                service: "mock".to_string(),
                details: "mock describe failure".to_string(),
            });
        }
        self.settle(&mut inner);
        Ok(inner.running)
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
