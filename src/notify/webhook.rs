use super::NotificationChannel;
use crate::error::NotifyError;
use crate::events::LifecycleEvent;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::json;

/// Send a request and turn transport errors and non-2xx replies into `NotifyError`
pub(super) async fn send_checked(
    channel: &str,
    request: RequestBuilder,
) -> Result<(), NotifyError> {
    let response = request.send().await.map_err(|e| NotifyError::Request {
        channel: channel.to_string(),
        details: e.to_string(),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Status {
        channel: channel.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Posts the event as JSON to an arbitrary endpoint
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &LifecycleEvent, message: &str) -> Result<(), NotifyError> {
        let payload = json!({
            "kind": event.kind,
            "timestamp": event.timestamp,
            "detail": event.detail,
            "degraded": event.degraded,
            "message": message,
        });
        send_checked(self.name(), self.client.post(&self.url).json(&payload)).await
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;
    use crate::events::LifecycleEventKind;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Captured = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn serve(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let handler = move |State(captured): State<Captured>, Json(body): Json<serde_json::Value>| {
            async move {
                captured.lock().push(body);
                status
            }
        };
        let app = Router::new()
            .route("/hook", post(handler))
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), captured)
    }

    #[tokio::test]
    async fn test_webhook_posts_event_json() {
        let (url, captured) = serve(StatusCode::OK).await;
        let channel = WebhookChannel::new(Client::new(), url);
        let event = LifecycleEvent::new(LifecycleEventKind::Launched, chrono::Utc::now(), "");

        channel.deliver(&event, "server is up").await.unwrap();

        let bodies = captured.lock().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["kind"], "launched");
        assert_eq!(bodies[0]["message"], "server is up");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let (url, _) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let channel = WebhookChannel::new(Client::new(), url);
        let event = LifecycleEvent::new(LifecycleEventKind::Shutdown, chrono::Utc::now(), "");

        let err = channel.deliver(&event, "down").await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500, .. }));
    }
}
