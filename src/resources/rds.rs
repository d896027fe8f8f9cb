//! RDS database instances.
//!
//! Instances with deletion protection refuse `DeleteDBInstance` with
//! `InvalidParameterCombination`. When the `DisableDeletionProtection`
//! setting is enabled the adapter disables protection via `ModifyDBInstance`
//! and retries the delete exactly once; otherwise the error is surfaced
//! unchanged.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_rds::Client;
use aws_sdk_rds::error::SdkError;
use aws_sdk_rds::operation::delete_db_instance::{DeleteDbInstanceError, DeleteDbInstanceOutput};
use aws_sdk_rds::operation::describe_db_instances::{
    DescribeDbInstancesError, DescribeDbInstancesOutput,
};
use aws_sdk_rds::operation::modify_db_instance::{ModifyDbInstanceError, ModifyDbInstanceOutput};
use tracing::{debug, info};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const RDS_INSTANCE_TYPE: &str = "RDSInstance";

pub const DISABLE_DELETION_PROTECTION_SETTING: &str = "DisableDeletionProtection";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: RDS_INSTANCE_TYPE,
        scope: Scope::Region,
        lister: Arc::new(RdsInstanceLister::new()),
        depends_on: &[],
        settings: &[DISABLE_DELETION_PROTECTION_SETTING],
        deprecated_aliases: &["RDSDBInstance"],
    })
}

/// Minimal RDS surface used by the adapter.
#[async_trait]
pub(crate) trait RdsApi: Send + Sync {
    async fn describe_db_instances(
        &self,
        marker: Option<String>,
    ) -> Result<DescribeDbInstancesOutput, SdkError<DescribeDbInstancesError>>;

    async fn delete_db_instance(
        &self,
        instance_id: &str,
    ) -> Result<DeleteDbInstanceOutput, SdkError<DeleteDbInstanceError>>;

    async fn disable_deletion_protection(
        &self,
        instance_id: &str,
    ) -> Result<ModifyDbInstanceOutput, SdkError<ModifyDbInstanceError>>;
}

#[async_trait]
impl RdsApi for Client {
    async fn describe_db_instances(
        &self,
        marker: Option<String>,
    ) -> Result<DescribeDbInstancesOutput, SdkError<DescribeDbInstancesError>> {
        self.describe_db_instances().set_marker(marker).send().await
    }

    async fn delete_db_instance(
        &self,
        instance_id: &str,
    ) -> Result<DeleteDbInstanceOutput, SdkError<DeleteDbInstanceError>> {
        self.delete_db_instance()
            .db_instance_identifier(instance_id)
            .skip_final_snapshot(true)
            .delete_automated_backups(true)
            .send()
            .await
    }

    async fn disable_deletion_protection(
        &self,
        instance_id: &str,
    ) -> Result<ModifyDbInstanceOutput, SdkError<ModifyDbInstanceError>> {
        self.modify_db_instance()
            .db_instance_identifier(instance_id)
            .deletion_protection(false)
            .apply_immediately(true)
            .send()
            .await
    }
}

pub struct RdsInstanceLister {
    client: Option<Arc<dyn RdsApi>>,
}

impl RdsInstanceLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn RdsApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for RdsInstanceLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for RdsInstanceLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn RdsApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let disable_protection = opts
            .settings
            .is_enabled(RDS_INSTANCE_TYPE, DISABLE_DELETION_PROTECTION_SETTING);

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = client
                .describe_db_instances(marker.clone())
                .await
                .map_err(|e| {
                    let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                    tracing::error!(
                        region = opts.region,
                        error_code = error_code,
                        error_message = error_message,
                        "RDS DescribeDBInstances API call failed: {} ({}).",
                        error_code,
                        error_message,
                    );
                    anyhow!(e).context("aws_sdk_rds::client::describe_db_instances() failed.")
                })?;

            for instance in output.db_instances() {
                let Some(identifier) = instance.db_instance_identifier() else {
                    continue;
                };
                resources.push(Arc::new(RdsInstance {
                    client: client.clone(),
                    identifier: identifier.to_string(),
                    arn: instance.db_instance_arn().map(String::from),
                    status: instance.db_instance_status().map(String::from),
                    engine: instance.engine().map(String::from),
                    deletion_protection: instance.deletion_protection().unwrap_or(false),
                    disable_protection,
                    tags: instance
                        .tag_list()
                        .iter()
                        .map(|t| {
                            (
                                t.key().unwrap_or_default().to_string(),
                                t.value().unwrap_or_default().to_string(),
                            )
                        })
                        .collect(),
                }));
            }

            marker = output.marker().map(String::from);
            if marker.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct RdsInstance {
    client: Arc<dyn RdsApi>,
    identifier: String,
    arn: Option<String>,
    status: Option<String>,
    engine: Option<String>,
    deletion_protection: bool,
    /// Resolved `DisableDeletionProtection` setting, baked in at list time.
    disable_protection: bool,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for RdsInstance {
    async fn remove(&self) -> Result<()> {
        match self.client.delete_db_instance(&self.identifier).await {
            Ok(_) => Ok(()),
            Err(e) if sdk_error_code(&e) == Some("DBInstanceNotFound") => {
                debug!(identifier = %self.identifier, "DB instance already removed.");
                Ok(())
            }
            Err(e) if sdk_error_code(&e) == Some("InvalidParameterCombination") => {
                if !self.disable_protection {
                    return Err(anyhow!(e)
                        .context("aws_sdk_rds::client::delete_db_instance() failed."));
                }

                info!(
                    identifier = %self.identifier,
                    "disabling deletion protection before retrying."
                );
                self.client
                    .disable_deletion_protection(&self.identifier)
                    .await
                    .map_err(|e| {
                        anyhow!(e).context("aws_sdk_rds::client::modify_db_instance() failed.")
                    })?;

                self.client
                    .delete_db_instance(&self.identifier)
                    .await
                    .map_err(|e| {
                        anyhow!(e).context("aws_sdk_rds::client::delete_db_instance() failed.")
                    })?;
                Ok(())
            }
            Err(e) => {
                Err(anyhow!(e).context("aws_sdk_rds::client::delete_db_instance() failed."))
            }
        }
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Identifier", &self.identifier);
        properties.set_opt("ARN", self.arn.clone());
        properties.set_opt("Status", self.status.clone());
        properties.set_opt("Engine", self.engine.clone());
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

impl fmt::Display for RdsInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}
