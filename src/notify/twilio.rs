use super::webhook::send_checked;
use super::NotificationChannel;
use crate::config::TwilioConfig;
use crate::error::NotifyError;
use crate::events::LifecycleEvent;
use async_trait::async_trait;
use reqwest::Client;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

/// SMS through the Twilio Messages API
pub struct TwilioChannel {
    client: Client,
    config: TwilioConfig,
    api_base: String,
}

impl TwilioChannel {
    pub fn new(client: Client, config: TwilioConfig) -> Self {
        Self {
            client,
            config,
            api_base: TWILIO_API.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl NotificationChannel for TwilioChannel {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn deliver(&self, _event: &LifecycleEvent, message: &str) -> Result<(), NotifyError> {
        let form = [
            ("From", self.config.from.as_str()),
            ("To", self.config.to.as_str()),
            ("Body", message),
        ];
        let request = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form);
        send_checked(self.name(), request).await
    }
}
