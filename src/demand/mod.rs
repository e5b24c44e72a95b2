//! Sources of "someone wants to play" signals.

#[cfg(feature = "http")]
mod http;
mod query_log;

#[cfg(feature = "http")]
pub use http::{router, HttpDemandSource};
pub use query_log::{QueryLogDemandSource, QueryLogMatcher};

use crate::error::Result;
use crate::lifecycle::Launcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One observed demand. Duplicates are expected and harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandSignal {
    pub source: String,
    pub detail: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl DemandSignal {
    pub fn new(source: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            detail: None,
            received_at,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Something that turns outside observations into launcher calls
#[async_trait]
pub trait DemandSource: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `shutdown` fires
    async fn run(&self, launcher: Arc<Launcher>, shutdown: CancellationToken) -> Result<()>;
}
