use super::{MessageFormatter, NotificationChannel, RetryPolicy};
use crate::events::{EventBus, EventFilter, EventReceiver, LifecycleEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Fans lifecycle events out to every channel without waiting on delivery.
///
/// Each channel gets its own task with its own retry budget, so a slow or
/// failing channel never holds up the others or the caller.
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    retry: RetryPolicy,
    formatter: MessageFormatter,
    bus: EventBus,
    tracker: TaskTracker,
}

impl NotificationDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        retry: RetryPolicy,
        formatter: MessageFormatter,
        bus: EventBus,
    ) -> Self {
        Self {
            channels,
            retry,
            formatter,
            bus,
            tracker: TaskTracker::new(),
        }
    }

    /// Dispatcher that only publishes on its event bus
    pub fn local_only() -> Self {
        Self::new(
            Vec::new(),
            RetryPolicy::default(),
            MessageFormatter::default(),
            EventBus::default(),
        )
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self, filter: EventFilter, name: &str) -> EventReceiver {
        self.bus.receiver(filter, name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Hand the event off for delivery and return immediately
    pub fn publish(&self, event: LifecycleEvent) {
        if let Err(e) = self.bus.publish(event.clone()) {
            debug!("No local event subscribers: {}", e);
        }

        let message = self.formatter.render(&event);
        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let retry = self.retry.clone();
            let event = event.clone();
            let message = message.clone();
            self.tracker
                .spawn(async move { deliver_with_retry(channel, retry, event, message).await });
        }
    }

    /// Wait for in-flight deliveries, used before process exit
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Like `flush`, giving up after `limit`
    pub async fn flush_within(&self, limit: Duration) -> bool {
        let flushed = tokio::time::timeout(limit, self.flush()).await.is_ok();
        if !flushed {
            warn!(
                pending = self.tracker.len(),
                "Notification deliveries still pending at exit"
            );
            self.tracker.reopen();
        }
        flushed
    }
}

async fn deliver_with_retry(
    channel: Arc<dyn NotificationChannel>,
    retry: RetryPolicy,
    event: LifecycleEvent,
    message: String,
) -> bool {
    let mut attempt = 0;
    loop {
        match channel.deliver(&event, &message).await {
            Ok(()) => {
                debug!(channel = channel.name(), kind = %event.kind, "Notification delivered");
                return true;
            }
            Err(e) if attempt < retry.max_retries => {
                let delay = retry.delay_for(attempt);
                warn!(
                    channel = channel.name(),
                    attempt = attempt + 1,
                    "Notification delivery failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                attempt += 1;
                sleep(delay).await;
            }
            Err(e) => {
                error!(
                    channel = channel.name(),
                    kind = %event.kind,
                    "Notification dropped after {} attempts: {}",
                    attempt + 1,
                    e
                );
                return false;
            }
        }
    }
}
