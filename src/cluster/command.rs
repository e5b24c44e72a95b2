use super::{ClusterController, TaskCount};
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// Drives the cluster through operator-supplied shell commands.
///
/// Templates may reference `{count}`, `{cluster}`, `{service}` and
/// `{region}`. The count command must print the running task count.
pub struct CommandClusterController {
    scale_command: String,
    count_command: String,
    cluster: String,
    service: String,
    region: String,
    command_timeout: Duration,
}

impl CommandClusterController {
    pub fn new(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let scale_command = config.scale_command.clone().ok_or_else(|| ClusterError::Command {
            command: "scale_command".to_string(),
            details: "not configured".to_string(),
        })?;
        let count_command = config.count_command.clone().ok_or_else(|| ClusterError::Command {
            command: "count_command".to_string(),
            details: "not configured".to_string(),
        })?;

        Ok(Self {
            scale_command,
            count_command,
            cluster: config.name.clone(),
            service: config.service.clone(),
            region: config.region.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
        })
    }

    fn render(&self, template: &str, count: Option<TaskCount>) -> String {
        let mut rendered = template
            .replace("{cluster}", &self.cluster)
            .replace("{service}", &self.service)
            .replace("{region}", &self.region);
        if let Some(count) = count {
            rendered = rendered.replace("{count}", &count.to_string());
        }
        rendered
    }

    async fn run(&self, command: &str) -> Result<String, ClusterError> {
        debug!("Running cluster command: {}", command);

        let output = timeout(
            self.command_timeout,
            Command::new("sh").arg("-c").arg(command).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| ClusterError::Command {
            command: command.to_string(),
            details: format!("timed out after {:?}", self.command_timeout),
        })?
        .map_err(|e| ClusterError::Command {
            command: command.to_string(),
            details: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(ClusterError::Command {
                command: command.to_string(),
                details: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ClusterController for CommandClusterController {
    async fn scale_to(&self, count: TaskCount) -> Result<(), ClusterError> {
        let command = self.render(&self.scale_command, Some(count));
        self.run(&command).await.map_err(|e| match e {
            ClusterError::Command { details, .. } => ClusterError::ScaleRejected {
                desired: count.as_u32(),
                details,
            },
            other => other,
        })?;
        info!(service = %self.service, desired = count.as_u32(), "scale command completed");
        Ok(())
    }

    async fn running_count(&self) -> Result<u32, ClusterError> {
        let command = self.render(&self.count_command, None);
        let output = self.run(&command).await?;
        let trimmed = output.trim();
        trimmed.parse::<u32>().map_err(|_| ClusterError::InvalidCount {
            output: trimmed.to_string(),
        })
    }

    fn describe(&self) -> String {
        format!("command:{}/{}", self.cluster, self.service)
    }
}
