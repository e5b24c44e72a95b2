use super::StateStore;
use crate::error::StoreError;
use crate::state::StateRecord;
use async_trait::async_trait;
use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use std::collections::HashMap;
use tracing::debug;

/// DynamoDB item holding the record as JSON, swapped with a conditional put.
///
/// Suited to deployments where launcher invocations run in separate,
/// short-lived instances that share nothing but the table.
pub struct DynamoStateStore {
    client: DynamoClient,
    table_name: String,
    key: String,
}

impl DynamoStateStore {
    pub fn new(
        client: DynamoClient,
        table_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            key: key.into(),
        }
    }

    pub async fn from_env(
        table_name: impl Into<String>,
        key: impl Into<String>,
        region: &str,
    ) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(DynamoClient::new(&config), table_name, key)
    }
}

#[async_trait]
impl StateStore for DynamoStateStore {
    async fn read(&self) -> Result<StateRecord, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("pk", AttributeValue::S(self.key.clone()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::Read {
                location: self.describe(),
                details: e.into_service_error().to_string(),
            })?;

        let Some(item) = output.item() else {
            return Ok(StateRecord::initial());
        };

        let json = item
            .get("record")
            .and_then(|value| value.as_s().ok())
            .ok_or_else(|| StoreError::Corrupt {
                details: format!("{} has no record attribute", self.describe()),
            })?;

        serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
            details: format!("{}: {}", self.describe(), e),
        })
    }

    async fn compare_and_swap(
        &self,
        expected: &StateRecord,
        mut next: StateRecord,
    ) -> Result<bool, StoreError> {
        next.revision = expected.revision + 1;
        let json = serde_json::to_string(&next).map_err(|e| StoreError::Write {
            location: self.describe(),
            details: format!("Failed to encode record: {}", e),
        })?;

        let mut item = HashMap::new();
        item.insert("pk".to_string(), AttributeValue::S(self.key.clone()));
        item.insert("record".to_string(), AttributeValue::S(json));
        item.insert(
            "revision".to_string(),
            AttributeValue::N(next.revision.to_string()),
        );

        // Revision 0 is the implicit initial record, which may not exist yet
        let condition = if expected.revision == 0 {
            "attribute_not_exists(pk) OR #rev = :expected"
        } else {
            "#rev = :expected"
        };

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression(condition)
            .expression_attribute_names("#rev", "revision")
            .expression_attribute_values(
                ":expected",
                AttributeValue::N(expected.revision.to_string()),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    debug!(expected = expected.revision, "dynamodb swap rejected");
                    Ok(false)
                } else {
                    Err(StoreError::Write {
                        location: self.describe(),
                        details: service_error.to_string(),
                    })
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("dynamodb:{}/{}", self.table_name, self.key)
    }
}
