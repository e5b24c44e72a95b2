use super::webhook::send_checked;
use super::NotificationChannel;
use crate::error::NotifyError;
use crate::events::LifecycleEvent;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Slack incoming webhook
pub struct SlackChannel {
    client: Client,
    webhook_url: String,
}

impl SlackChannel {
    pub fn new(client: Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }

    fn payload(event: &LifecycleEvent, message: &str) -> Value {
        let icon = if event.degraded {
            ":warning:"
        } else {
            ":video_game:"
        };
        json!({ "text": format!("{} {}", icon, message) })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn deliver(&self, event: &LifecycleEvent, message: &str) -> Result<(), NotifyError> {
        let request = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(event, message));
        send_checked(self.name(), request).await
    }
}
