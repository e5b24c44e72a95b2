//! Best-effort fan-out of lifecycle events to operator channels.

mod dispatcher;
mod log;
pub mod mock;
mod retry;
#[cfg(feature = "aws")]
mod sns;
mod slack;
mod twilio;
mod webhook;

pub use dispatcher::NotificationDispatcher;
pub use log::LogChannel;
pub use mock::{FailingChannel, RecordingChannel};
pub use retry::RetryPolicy;
#[cfg(feature = "aws")]
pub use sns::SnsChannel;
pub use slack::SlackChannel;
pub use twilio::TwilioChannel;
pub use webhook::WebhookChannel;

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use crate::events::LifecycleEvent;
use async_trait::async_trait;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A single delivery target
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// One delivery attempt; retries are handled by the dispatcher
    async fn deliver(&self, event: &LifecycleEvent, message: &str) -> Result<(), NotifyError>;
}

/// Renders events into operator-facing text
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    display_name: String,
    timezone: Tz,
}

impl MessageFormatter {
    pub fn new(display_name: impl Into<String>, timezone: Tz) -> Self {
        Self {
            display_name: display_name.into(),
            timezone,
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let timezone = config
            .timezone
            .parse::<Tz>()
            .map_err(|e| NotifyError::Misconfigured {
                channel: "formatter".to_string(),
                details: e.to_string(),
            })?;
        Ok(Self::new(config.display_name.clone(), timezone))
    }

    pub fn render(&self, event: &LifecycleEvent) -> String {
        let local = event.timestamp.with_timezone(&self.timezone);
        format!(
            "[{}] {} ({})",
            self.display_name,
            event.description(),
            local.format("%Y-%m-%d %H:%M:%S %Z")
        )
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new("server", Tz::UTC)
    }
}

/// Build every channel that has settings present
pub async fn channels_from_config(
    config: &NotifyConfig,
) -> Result<Vec<Arc<dyn NotificationChannel>>, NotifyError> {
    let timeout = Duration::from_secs(config.request_timeout_seconds);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NotifyError::Misconfigured {
            channel: "http".to_string(),
            details: e.to_string(),
        })?;

    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    if config.log_events {
        channels.push(Arc::new(LogChannel));
    }

    if let Some(url) = &config.slack_webhook_url {
        channels.push(Arc::new(SlackChannel::new(client.clone(), url.clone())));
    }

    if let Some(url) = &config.webhook_url {
        channels.push(Arc::new(WebhookChannel::new(client.clone(), url.clone())));
    }

    if let Some(twilio) = &config.twilio {
        channels.push(Arc::new(TwilioChannel::new(client.clone(), twilio.clone())));
    }

    if let Some(topic_arn) = &config.sns_topic_arn {
        #[cfg(feature = "aws")]
        {
            channels.push(Arc::new(SnsChannel::from_env(topic_arn.clone()).await));
        }
        #[cfg(not(feature = "aws"))]
        {
            return Err(NotifyError::Misconfigured {
                channel: "sns".to_string(),
                details: format!("{} configured but built without the aws feature", topic_arn),
            });
        }
    }

    info!(
        channels = ?channels.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
        "Notification channels configured"
    );
    Ok(channels)
}
