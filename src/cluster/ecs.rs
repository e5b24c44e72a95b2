use super::{ClusterController, TaskCount};
use crate::error::ClusterError;
use async_trait::async_trait;
use aws_sdk_ecs::Client as EcsClient;
use tracing::info;

/// ECS service whose desired count is toggled between 0 and 1
pub struct EcsClusterController {
    client: EcsClient,
    cluster: String,
    service: String,
}

impl EcsClusterController {
    pub fn new(client: EcsClient, cluster: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            service: service.into(),
        }
    }

    pub async fn from_env(
        cluster: impl Into<String>,
        service: impl Into<String>,
        region: &str,
    ) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(EcsClient::new(&config), cluster, service)
    }
}

#[async_trait]
impl ClusterController for EcsClusterController {
    async fn scale_to(&self, count: TaskCount) -> Result<(), ClusterError> {
        self.client
            .update_service()
            .cluster(&self.cluster)
            .service(&self.service)
            .desired_count(count.as_u32() as i32)
            .send()
            .await
            .map_err(|e| ClusterError::ScaleRejected {
                desired: count.as_u32(),
                details: e.into_service_error().to_string(),
            })?;

        info!(
            cluster = %self.cluster,
            service = %self.service,
            desired = count.as_u32(),
            "ECS desired count updated"
        );
        Ok(())
    }

    async fn running_count(&self) -> Result<u32, ClusterError> {
        let output = self
            .client
            .describe_services()
            .cluster(&self.cluster)
            .services(&self.service)
            .send()
            .await
            .map_err(|e| ClusterError::Describe {
                service: self.service.clone(),
                details: e.into_service_error().to_string(),
            })?;

        let service = output
            .services()
            .iter()
            .find(|s| s.service_name() == Some(self.service.as_str()))
            .or_else(|| output.services().first())
            .ok_or_else(|| ClusterError::ServiceNotFound {
                cluster: self.cluster.clone(),
                service: self.service.clone(),
            })?;

        Ok(service.running_count().max(0) as u32)
    }

    fn describe(&self) -> String {
        format!("ecs:{}/{}", self.cluster, self.service)
    }
}
