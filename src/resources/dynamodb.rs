//! DynamoDB tables.
//!
//! Tables with deletion protection refuse `DeleteTable` with a
//! `ValidationException`. When the `DisableDeletionProtection` setting is
//! enabled the adapter flips the flag via `UpdateTable` and retries the
//! delete exactly once; otherwise the error is surfaced unchanged.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::delete_table::{DeleteTableError, DeleteTableOutput};
use aws_sdk_dynamodb::operation::describe_table::{DescribeTableError, DescribeTableOutput};
use aws_sdk_dynamodb::operation::list_tables::{ListTablesError, ListTablesOutput};
use aws_sdk_dynamodb::operation::list_tags_of_resource::{
    ListTagsOfResourceError, ListTagsOfResourceOutput,
};
use aws_sdk_dynamodb::operation::update_table::{UpdateTableError, UpdateTableOutput};
use tracing::{debug, info, warn};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const DYNAMODB_TABLE_TYPE: &str = "DynamoDBTable";

pub const DISABLE_DELETION_PROTECTION_SETTING: &str = "DisableDeletionProtection";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: DYNAMODB_TABLE_TYPE,
        scope: Scope::Region,
        lister: Arc::new(DynamoDbTableLister::new()),
        depends_on: &[],
        settings: &[DISABLE_DELETION_PROTECTION_SETTING],
        deprecated_aliases: &[],
    })
}

/// Minimal DynamoDB surface used by the adapter.
#[async_trait]
pub(crate) trait DynamoDbApi: Send + Sync {
    async fn list_tables(
        &self,
        start_table_name: Option<String>,
    ) -> Result<ListTablesOutput, SdkError<ListTablesError>>;

    async fn describe_table(
        &self,
        table_name: &str,
    ) -> Result<DescribeTableOutput, SdkError<DescribeTableError>>;

    async fn list_tags_of_resource(
        &self,
        resource_arn: &str,
    ) -> Result<ListTagsOfResourceOutput, SdkError<ListTagsOfResourceError>>;

    async fn delete_table(
        &self,
        table_name: &str,
    ) -> Result<DeleteTableOutput, SdkError<DeleteTableError>>;

    async fn disable_deletion_protection(
        &self,
        table_name: &str,
    ) -> Result<UpdateTableOutput, SdkError<UpdateTableError>>;
}

#[async_trait]
impl DynamoDbApi for Client {
    async fn list_tables(
        &self,
        start_table_name: Option<String>,
    ) -> Result<ListTablesOutput, SdkError<ListTablesError>> {
        self.list_tables()
            .set_exclusive_start_table_name(start_table_name)
            .send()
            .await
    }

    async fn describe_table(
        &self,
        table_name: &str,
    ) -> Result<DescribeTableOutput, SdkError<DescribeTableError>> {
        self.describe_table().table_name(table_name).send().await
    }

    async fn list_tags_of_resource(
        &self,
        resource_arn: &str,
    ) -> Result<ListTagsOfResourceOutput, SdkError<ListTagsOfResourceError>> {
        self.list_tags_of_resource()
            .resource_arn(resource_arn)
            .send()
            .await
    }

    async fn delete_table(
        &self,
        table_name: &str,
    ) -> Result<DeleteTableOutput, SdkError<DeleteTableError>> {
        self.delete_table().table_name(table_name).send().await
    }

    async fn disable_deletion_protection(
        &self,
        table_name: &str,
    ) -> Result<UpdateTableOutput, SdkError<UpdateTableError>> {
        self.update_table()
            .table_name(table_name)
            .deletion_protection_enabled(false)
            .send()
            .await
    }
}

pub struct DynamoDbTableLister {
    client: Option<Arc<dyn DynamoDbApi>>,
}

impl DynamoDbTableLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn DynamoDbApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for DynamoDbTableLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for DynamoDbTableLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn DynamoDbApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let disable_protection = opts
            .settings
            .is_enabled(DYNAMODB_TABLE_TYPE, DISABLE_DELETION_PROTECTION_SETTING);

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut start_table_name: Option<String> = None;

        loop {
            let output = client
                .list_tables(start_table_name.clone())
                .await
                .map_err(|e| {
                    let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                    tracing::error!(
                        region = opts.region,
                        error_code = error_code,
                        error_message = error_message,
                        "DynamoDB ListTables API call failed: {} ({}).",
                        error_code,
                        error_message,
                    );
                    anyhow!(e).context("aws_sdk_dynamodb::client::list_tables() failed.")
                })?;

            for table_name in output.table_names() {
                let described = client.describe_table(table_name).await.map_err(|e| {
                    anyhow!(e).context("aws_sdk_dynamodb::client::describe_table() failed.")
                })?;
                let table = described.table();
                let arn = table.and_then(|t| t.table_arn()).map(String::from);

                // Tag fetch is best-effort.
                let mut tags: Vec<(String, String)> = Vec::new();
                if let Some(arn) = &arn {
                    match client.list_tags_of_resource(arn).await {
                        Ok(tag_output) => {
                            for tag in tag_output.tags() {
                                tags.push((tag.key().to_string(), tag.value().to_string()));
                            }
                        }
                        Err(e) => {
                            warn!(
                                table = table_name,
                                error = %e,
                                "could not fetch tags for table, continuing without them."
                            );
                        }
                    }
                }

                resources.push(Arc::new(DynamoDbTable {
                    client: client.clone(),
                    name: table_name.clone(),
                    arn,
                    status: table
                        .and_then(|t| t.table_status())
                        .map(|s| s.as_str().to_string()),
                    deletion_protection: table
                        .and_then(|t| t.deletion_protection_enabled())
                        .unwrap_or(false),
                    disable_protection,
                    tags,
                }));
            }

            start_table_name = output.last_evaluated_table_name().map(String::from);
            if start_table_name.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct DynamoDbTable {
    client: Arc<dyn DynamoDbApi>,
    name: String,
    arn: Option<String>,
    status: Option<String>,
    deletion_protection: bool,
    /// Resolved `DisableDeletionProtection` setting, baked in at list time.
    disable_protection: bool,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for DynamoDbTable {
    async fn remove(&self) -> Result<()> {
        match self.client.delete_table(&self.name).await {
            Ok(_) => Ok(()),
            Err(e) if sdk_error_code(&e) == Some("ResourceNotFoundException") => {
                debug!(table = %self.name, "table already removed.");
                Ok(())
            }
            Err(e) if sdk_error_code(&e) == Some("ResourceInUseException") => {
                // A table in DELETING state reports in-use; the deletion is
                // already under way.
                debug!(table = %self.name, "table deletion already in progress.");
                Ok(())
            }
            Err(e) if sdk_error_code(&e) == Some("ValidationException") => {
                if !self.disable_protection {
                    return Err(
                        anyhow!(e).context("aws_sdk_dynamodb::client::delete_table() failed.")
                    );
                }

                info!(table = %self.name, "disabling deletion protection before retrying.");
                self.client
                    .disable_deletion_protection(&self.name)
                    .await
                    .map_err(|e| {
                        anyhow!(e).context("aws_sdk_dynamodb::client::update_table() failed.")
                    })?;

                self.client.delete_table(&self.name).await.map_err(|e| {
                    anyhow!(e).context("aws_sdk_dynamodb::client::delete_table() failed.")
                })?;
                Ok(())
            }
            Err(e) => Err(anyhow!(e).context("aws_sdk_dynamodb::client::delete_table() failed.")),
        }
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.name);
        properties.set_opt("ARN", self.arn.clone());
        properties.set_opt("Status", self.status.clone());
        properties.set(
            "DeletionProtection",
            if self.deletion_protection { "true" } else { "false" },
        );
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }
}

impl fmt::Display for DynamoDbTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_dummy_tracing_subscriber, make_test_lister_opts, sdk_http_response};
    use aws_sdk_dynamodb::error::ErrorMetadata;
    use aws_sdk_dynamodb::types::{TableDescription, TableStatus, Tag};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockDynamoDb {
        pages: Mutex<VecDeque<ListTablesOutput>>,
        delete_calls: Mutex<Vec<String>>,
        update_calls: Mutex<Vec<String>>,
        delete_errors: Mutex<VecDeque<&'static str>>,
    }

    #[async_trait]
    impl DynamoDbApi for MockDynamoDb {
        async fn list_tables(
            &self,
            _start_table_name: Option<String>,
        ) -> Result<ListTablesOutput, SdkError<ListTablesError>> {
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ListTablesOutput::builder().build()))
        }

        async fn describe_table(
            &self,
            table_name: &str,
        ) -> Result<DescribeTableOutput, SdkError<DescribeTableError>> {
            Ok(DescribeTableOutput::builder()
                .table(
                    TableDescription::builder()
                        .table_name(table_name)
                        .table_arn(format!(
                            "arn:aws:dynamodb:us-east-1:123456789012:table/{table_name}"
                        ))
                        .table_status(TableStatus::Active)
                        .deletion_protection_enabled(false)
                        .build(),
                )
                .build())
        }

        async fn list_tags_of_resource(
            &self,
            _resource_arn: &str,
        ) -> Result<ListTagsOfResourceOutput, SdkError<ListTagsOfResourceError>> {
            Ok(ListTagsOfResourceOutput::builder()
                .tags(Tag::builder().key("env").value("dev").build().unwrap())
                .build())
        }

        async fn delete_table(
            &self,
            table_name: &str,
        ) -> Result<DeleteTableOutput, SdkError<DeleteTableError>> {
            self.delete_calls
                .lock()
                .unwrap()
                .push(table_name.to_string());
            if let Some(code) = self.delete_errors.lock().unwrap().pop_front() {
                return Err(SdkError::service_error(
                    DeleteTableError::generic(ErrorMetadata::builder().code(code).build()),
                    sdk_http_response(),
                ));
            }
            Ok(DeleteTableOutput::builder().build())
        }

        async fn disable_deletion_protection(
            &self,
            table_name: &str,
        ) -> Result<UpdateTableOutput, SdkError<UpdateTableError>> {
            self.update_calls
                .lock()
                .unwrap()
                .push(table_name.to_string());
            Ok(UpdateTableOutput::builder().build())
        }
    }

    fn table(mock: Arc<MockDynamoDb>, disable_protection: bool) -> DynamoDbTable {
        DynamoDbTable {
            client: mock,
            name: "users".to_string(),
            arn: None,
            status: Some("ACTIVE".to_string()),
            deletion_protection: true,
            disable_protection,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn list_tables_describes_each_table() {
        init_dummy_tracing_subscriber();

        let page1 = ListTablesOutput::builder()
            .table_names("users")
            .last_evaluated_table_name("users")
            .build();
        let page2 = ListTablesOutput::builder().table_names("orders").build();

        let mock = MockDynamoDb {
            pages: Mutex::new(vec![page1, page2].into()),
            ..Default::default()
        };
        let lister = DynamoDbTableLister::with_client(Arc::new(mock));
        let resources = lister.list(&make_test_lister_opts()).await.unwrap();

        let ids: Vec<String> = resources.iter().map(|r| r.to_string()).collect();
        assert_eq!(ids, vec!["users", "orders"]);

        let properties = resources[0].properties();
        assert_eq!(properties.get("Name"), Some("users"));
        assert_eq!(properties.get("Status"), Some("ACTIVE"));
        assert_eq!(properties.get("tag:env"), Some("dev"));
    }

    #[tokio::test]
    async fn remove_tolerates_not_found_and_in_use() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockDynamoDb {
            delete_errors: Mutex::new(vec!["ResourceNotFoundException"].into()),
            ..Default::default()
        });
        assert!(table(mock, false).remove().await.is_ok());

        let mock = Arc::new(MockDynamoDb {
            delete_errors: Mutex::new(vec!["ResourceInUseException"].into()),
            ..Default::default()
        });
        assert!(table(mock, false).remove().await.is_ok());
    }

    #[tokio::test]
    async fn protected_table_without_setting_surfaces_error() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockDynamoDb {
            delete_errors: Mutex::new(vec!["ValidationException"].into()),
            ..Default::default()
        });

        assert!(table(mock.clone(), false).remove().await.is_err());
        assert!(mock.update_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn protected_table_with_setting_updates_and_retries_once() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockDynamoDb {
            delete_errors: Mutex::new(vec!["ValidationException"].into()),
            ..Default::default()
        });

        table(mock.clone(), true).remove().await.unwrap();

        assert_eq!(mock.update_calls.lock().unwrap().as_slice(), ["users"]);
        assert_eq!(mock.delete_calls.lock().unwrap().as_slice(), ["users", "users"]);
    }
}
