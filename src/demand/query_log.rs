use super::DemandSource;
use crate::config::DemandConfig;
use crate::error::Result;
use crate::lifecycle::{LaunchClaim, Launcher};
use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recognizes DNS query log lines that ask for the server's hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLogMatcher {
    hostname: String,
}

impl QueryLogMatcher {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: normalize(hostname),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// True if any field of `line` names the hostname, ignoring case and a trailing dot
    pub fn matches(&self, line: &str) -> bool {
        if self.hostname.is_empty() {
            return false;
        }
        line.split(|c: char| c.is_whitespace() || c == '"' || c == ',')
            .any(|field| normalize(field) == self.hostname)
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Longest unterminated line kept between reads
const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Incremental reader over an append-only log file
struct LogFollower {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    // Set after an overlong line was dropped, until its newline shows up
    discarding: bool,
}

impl LogFollower {
    /// Start at the current end so history is never replayed
    async fn at_end(path: &Path) -> std::io::Result<Self> {
        let offset = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            offset,
            partial: Vec::new(),
            discarding: false,
        })
    }

    /// Complete lines appended since the last call
    async fn read_new_lines(&mut self) -> std::io::Result<Vec<String>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        if len < self.offset {
            info!(path = %self.path.display(), "Query log truncated, reading from start");
            self.offset = 0;
            self.partial.clear();
            self.discarding = false;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.take(len - self.offset).read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        // Decode whole lines only, so a character split across reads stays intact
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }

        if self.partial.len() > MAX_PARTIAL_LINE {
            warn!(
                path = %self.path.display(),
                bytes = self.partial.len(),
                "Dropping overlong query log line"
            );
            self.partial.clear();
            self.discarding = true;
        }
        Ok(lines)
    }
}

/// Follows a DNS query log and launches when the server's hostname is looked up
pub struct QueryLogDemandSource {
    path: PathBuf,
    matcher: QueryLogMatcher,
    poll_interval: Duration,
}

impl QueryLogDemandSource {
    pub fn new(path: impl Into<PathBuf>, hostname: &str, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            matcher: QueryLogMatcher::new(hostname),
            poll_interval,
        }
    }

    /// `None` unless both a log path and a hostname are configured
    pub fn from_config(config: &DemandConfig) -> Option<Self> {
        let path = config.query_log_path.as_ref()?;
        let hostname = config.hostname.as_ref()?;
        Some(Self::new(
            path,
            hostname,
            Duration::from_millis(config.query_log_poll_millis.max(1)),
        ))
    }

    async fn fire(&self, launcher: &Arc<Launcher>, line: &str) {
        let signal = launcher.signal("query_log").with_detail(line);
        match launcher.claim(signal).await {
            Ok(LaunchClaim::Claimed(pending)) => {
                let background = Arc::clone(launcher);
                tokio::spawn(async move {
                    match background.complete(pending).await {
                        Ok(outcome) => info!(?outcome, "Query-triggered launch finished"),
                        Err(e) => error!("Query-triggered launch failed: {}", e),
                    }
                });
            }
            Ok(LaunchClaim::Skipped(outcome)) => debug!(?outcome, "Lookup seen, nothing to launch"),
            Err(e) => warn!("Lookup seen but launch claim failed: {}", e),
        }
    }
}

#[async_trait]
impl DemandSource for QueryLogDemandSource {
    fn name(&self) -> &str {
        "query_log"
    }

    async fn run(&self, launcher: Arc<Launcher>, shutdown: CancellationToken) -> Result<()> {
        let mut follower = LogFollower::at_end(&self.path).await?;
        info!(
            path = %self.path.display(),
            hostname = %self.matcher.hostname(),
            offset = follower.offset,
            "Following DNS query log"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Query log follower stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let lines = match follower.read_new_lines().await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(path = %self.path.display(), "Failed to read query log: {}", e);
                    continue;
                }
            };

            // One claim per batch; the launcher absorbs the rest anyway
            if let Some(line) = lines.iter().find(|line| self.matcher.matches(line)) {
                debug!(line = %line, "Lookup for server hostname");
                self.fire(&launcher, line).await;
            }
        }
    }
}
