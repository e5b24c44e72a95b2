use super::NotificationChannel;
use crate::error::NotifyError;
use crate::events::{LifecycleEvent, LifecycleEventKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Channel that keeps every delivered event in memory
pub struct RecordingChannel {
    name: String,
    delay: Option<Duration>,
    events: Mutex<Vec<(LifecycleEvent, String)>>,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Simulate a slow endpoint
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.events.lock().iter().map(|(e, _)| e.kind).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &LifecycleEvent, message: &str) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().push((event.clone(), message.to_string()));
        Ok(())
    }
}

/// Channel that fails a configurable number of times
pub struct FailingChannel {
    name: String,
    failures_left: Option<AtomicUsize>,
    attempts: AtomicUsize,
    delivered: AtomicUsize,
}

impl FailingChannel {
    pub fn always(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures_left: None,
            attempts: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` attempts, then succeed
    pub fn first_n(name: impl Into<String>, n: usize) -> Self {
        Self {
            failures_left: Some(AtomicUsize::new(n)),
            ..Self::always(name)
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, _event: &LifecycleEvent, _message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let fail = match &self.failures_left {
            None => true,
            Some(left) => left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        };

        if fail {
            return Err(NotifyError::Request {
                channel: self.name.clone(),
                details: "simulated failure".to_string(),
            });
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
