use super::DemandSource;
use crate::error::{ControllerError, Result};
use crate::lifecycle::{LaunchClaim, LaunchOutcome, Launcher};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Routes for the launch endpoint.
///
/// `POST /launch` answers as soon as the launch is claimed; the scale-up
/// and the wait for the task run in the background.
pub fn router(launcher: Arc<Launcher>) -> Router {
    Router::new()
        .route("/launch", post(launch_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(launcher)
}

async fn launch_handler(State(launcher): State<Arc<Launcher>>) -> impl IntoResponse {
    let signal = launcher.signal("http");

    match launcher.claim(signal).await {
        Ok(LaunchClaim::Claimed(pending)) => {
            let background = Arc::clone(&launcher);
            tokio::spawn(async move {
                match background.complete(pending).await {
                    Ok(outcome) => info!(?outcome, "HTTP-triggered launch finished"),
                    Err(e) => error!("HTTP-triggered launch failed: {}", e),
                }
            });
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "outcome": "launching" })),
            )
        }
        Ok(LaunchClaim::Skipped(outcome)) => {
            let status = match outcome {
                LaunchOutcome::Busy => StatusCode::CONFLICT,
                _ => StatusCode::OK,
            };
            (status, Json(serde_json::json!(outcome)))
        }
        Err(e) => {
            error!("Launch request failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "outcome": "error", "error": e.to_string() })),
            )
        }
    }
}

async fn status_handler(State(launcher): State<Arc<Launcher>>) -> impl IntoResponse {
    match launcher.status().await {
        Ok(record) => (StatusCode::OK, Json(serde_json::json!(record))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" })))
}

/// Serves the launch endpoint until shutdown
pub struct HttpDemandSource {
    address: String,
}

impl HttpDemandSource {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl DemandSource for HttpDemandSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self, launcher: Arc<Launcher>, shutdown: CancellationToken) -> Result<()> {
        let app = router(launcher);

        info!("Starting launch endpoint on {}", self.address);

        let listener = tokio::net::TcpListener::bind(&self.address)
            .await
            .map_err(|e| {
                ControllerError::component("demand", format!("bind {} failed: {}", self.address, e))
            })?;

        info!("Launch endpoint listening on {}", self.address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ControllerError::component("demand", format!("server error: {}", e)))?;

        info!("Launch endpoint stopped");
        Ok(())
    }
}
