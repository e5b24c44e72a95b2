use super::{ComponentState, OndemandOrchestrator};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Slack on top of the shutdown deadline for tasks to wind down
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Upper bound on waiting for queued notifications at exit
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

impl OndemandOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();
        self.tasks.close();

        for (component, state) in self.get_all_component_states().await {
            if state == ComponentState::Running || state == ComponentState::Starting {
                self.set_component_state(&component, ComponentState::Stopping)
                    .await;
            }
        }

        let mut exit_code = 0;

        // An in-flight workload shutdown may take up to its deadline
        let limit = self.timings.shutdown_deadline + STOP_GRACE;
        if timeout(limit, self.tasks.wait()).await.is_err() {
            error!("Components did not stop within {:?}", limit);
            exit_code = 1;
            for (component, state) in self.get_all_component_states().await {
                if state != ComponentState::Stopped {
                    self.set_component_state(&component, ComponentState::Failed)
                        .await;
                }
            }
        }

        if self
            .get_all_component_states()
            .await
            .values()
            .any(|state| *state == ComponentState::Failed)
        {
            exit_code = 1;
        }

        if !self.backends.dispatcher.flush_within(NOTIFY_FLUSH_TIMEOUT).await {
            warn!("Some notifications were still in flight at exit");
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
