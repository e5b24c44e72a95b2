use super::NotificationChannel;
use crate::error::NotifyError;
use crate::events::LifecycleEvent;
use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;

/// Broadcast through an SNS topic
pub struct SnsChannel {
    client: SnsClient,
    topic_arn: String,
}

impl SnsChannel {
    pub fn new(client: SnsClient, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }

    pub async fn from_env(topic_arn: String) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(SnsClient::new(&config), topic_arn)
    }
}

#[async_trait]
impl NotificationChannel for SnsChannel {
    fn name(&self) -> &str {
        "sns"
    }

    async fn deliver(&self, event: &LifecycleEvent, message: &str) -> Result<(), NotifyError> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(event.description().chars().take(100).collect::<String>())
            .message(message)
            .send()
            .await
            .map_err(|e| NotifyError::Request {
                channel: "sns".to_string(),
                details: e.into_service_error().to_string(),
            })?;
        Ok(())
    }
}
