use super::NotificationChannel;
use crate::error::NotifyError;
use crate::events::LifecycleEvent;
use async_trait::async_trait;
use tracing::{info, warn};

/// Writes events to the process log; always succeeds
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &LifecycleEvent, message: &str) -> Result<(), NotifyError> {
        if event.degraded {
            warn!(target: "ondemand::notifications", kind = %event.kind, "{}", message);
        } else {
            info!(target: "ondemand::notifications", kind = %event.kind, "{}", message);
        }
        Ok(())
    }
}
