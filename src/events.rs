use crate::error::NotifyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Points in the launch/shutdown cycle that operators are told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Launching,
    Launched,
    LaunchFailed,
    ShuttingDown,
    Shutdown,
}

impl LifecycleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::Launching => "launching",
            LifecycleEventKind::Launched => "launched",
            LifecycleEventKind::LaunchFailed => "launch_failed",
            LifecycleEventKind::ShuttingDown => "shutting_down",
            LifecycleEventKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
    /// Set for failed launches and shutdowns that could not be confirmed
    #[serde(default)]
    pub degraded: bool,
}

impl LifecycleEvent {
    pub fn new(
        kind: LifecycleEventKind,
        timestamp: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            timestamp,
            detail: detail.into(),
            degraded: kind == LifecycleEventKind::LaunchFailed,
        }
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        let headline = match self.kind {
            LifecycleEventKind::Launching => "Server launching",
            LifecycleEventKind::Launched => "Server is up",
            LifecycleEventKind::LaunchFailed => "Server launch failed",
            LifecycleEventKind::ShuttingDown => "Server shutting down",
            LifecycleEventKind::Shutdown if self.degraded => "Server shutdown not confirmed",
            LifecycleEventKind::Shutdown => "Server is down",
        };
        if self.detail.is_empty() {
            headline.to_string()
        } else {
            format!("{}: {}", headline, self.detail)
        }
    }
}

/// In-process broadcast of lifecycle events for local observers
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn receiver(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LifecycleEvent) -> Result<usize, NotifyError> {
        match event.kind {
            LifecycleEventKind::LaunchFailed => warn!("{}", event.description()),
            LifecycleEventKind::Shutdown if event.degraded => warn!("{}", event.description()),
            _ => info!("{}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| NotifyError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    Kinds(Vec<LifecycleEventKind>),
    Custom(fn(&LifecycleEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&event.kind),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<LifecycleEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event.
    ///
    /// A lagging receiver skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Result<LifecycleEvent, NotifyError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!("Receiver '{}' received event: {}", self.name, event.event_type());
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(NotifyError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<LifecycleEvent>, NotifyError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(NotifyError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn event(kind: LifecycleEventKind) -> LifecycleEvent {
        LifecycleEvent::new(kind, Utc::now(), "")
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus.publish(event(LifecycleEventKind::Launching)).unwrap();
        assert_eq!(subscriber_count, 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.kind, LifecycleEventKind::Launching);
    }

    #[test]
    fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        assert!(event_bus.publish(event(LifecycleEventKind::Shutdown)).is_err());
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.receiver(
            EventFilter::Kinds(vec![LifecycleEventKind::Launched]),
            "test",
        );

        event_bus.publish(event(LifecycleEventKind::Launching)).unwrap();
        event_bus.publish(event(LifecycleEventKind::Launched)).unwrap();

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, LifecycleEventKind::Launched);
        assert!(receiver.drain().is_empty());
    }

    #[test]
    fn test_event_properties() {
        let failed = LifecycleEvent::new(LifecycleEventKind::LaunchFailed, Utc::now(), "timed out");
        assert!(failed.degraded);
        assert_eq!(failed.event_type(), "launch_failed");
        assert_eq!(failed.description(), "Server launch failed: timed out");

        let incomplete = event(LifecycleEventKind::Shutdown).degraded();
        assert!(incomplete.description().contains("not confirmed"));
        assert!(!event(LifecycleEventKind::Shutdown).degraded);
    }

    #[test]
    fn test_event_json_shape() {
        let value = serde_json::to_value(event(LifecycleEventKind::ShuttingDown)).unwrap();
        assert_eq!(value["kind"], "shutting_down");
        assert!(value["timestamp"].is_string());
    }
}
