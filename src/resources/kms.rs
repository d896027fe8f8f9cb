//! KMS aliases and customer-managed keys.
//!
//! Keys are not deleted immediately: `ScheduleKeyDeletion` only starts the
//! mandatory pending window, so a successful removal means "deletion
//! scheduled". AWS-managed aliases (`alias/aws/`) and AWS-managed keys are
//! never offered for deletion.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_kms::Client;
use aws_sdk_kms::error::SdkError;
use aws_sdk_kms::operation::delete_alias::{DeleteAliasError, DeleteAliasOutput};
use aws_sdk_kms::operation::describe_key::{DescribeKeyError, DescribeKeyOutput};
use aws_sdk_kms::operation::list_aliases::{ListAliasesError, ListAliasesOutput};
use aws_sdk_kms::operation::list_keys::{ListKeysError, ListKeysOutput};
use aws_sdk_kms::operation::list_resource_tags::{ListResourceTagsError, ListResourceTagsOutput};
use aws_sdk_kms::operation::schedule_key_deletion::{
    ScheduleKeyDeletionError, ScheduleKeyDeletionOutput,
};
use aws_sdk_kms::types::{KeyManagerType, KeyState};
use tracing::{debug, warn};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const KMS_ALIAS_TYPE: &str = "KMSAlias";
pub const KMS_KEY_TYPE: &str = "KMSKey";

const AWS_ALIAS_PREFIX: &str = "alias/aws/";

/// Days before a scheduled key deletion becomes effective (the minimum AWS
/// allows).
const PENDING_WINDOW_IN_DAYS: i32 = 7;

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: KMS_ALIAS_TYPE,
        scope: Scope::Region,
        lister: Arc::new(KmsAliasLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })?;
    registry.register(Registration {
        name: KMS_KEY_TYPE,
        scope: Scope::Region,
        // Aliases go first so keys are not left dangling behind them.
        lister: Arc::new(KmsKeyLister::new()),
        depends_on: &[KMS_ALIAS_TYPE],
        settings: &[],
        deprecated_aliases: &[],
    })
}

/// Minimal KMS surface used by the adapters. Implemented by the real client;
/// tests substitute a mock.
#[async_trait]
pub(crate) trait KmsApi: Send + Sync {
    async fn list_aliases(
        &self,
        marker: Option<String>,
    ) -> Result<ListAliasesOutput, SdkError<ListAliasesError>>;

    async fn delete_alias(
        &self,
        alias_name: &str,
    ) -> Result<DeleteAliasOutput, SdkError<DeleteAliasError>>;

    async fn list_keys(
        &self,
        marker: Option<String>,
    ) -> Result<ListKeysOutput, SdkError<ListKeysError>>;

    async fn describe_key(
        &self,
        key_id: &str,
    ) -> Result<DescribeKeyOutput, SdkError<DescribeKeyError>>;

    async fn list_resource_tags(
        &self,
        key_id: &str,
    ) -> Result<ListResourceTagsOutput, SdkError<ListResourceTagsError>>;

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
    ) -> Result<ScheduleKeyDeletionOutput, SdkError<ScheduleKeyDeletionError>>;
}

#[async_trait]
impl KmsApi for Client {
    async fn list_aliases(
        &self,
        marker: Option<String>,
    ) -> Result<ListAliasesOutput, SdkError<ListAliasesError>> {
        self.list_aliases().set_marker(marker).send().await
    }

    async fn delete_alias(
        &self,
        alias_name: &str,
    ) -> Result<DeleteAliasOutput, SdkError<DeleteAliasError>> {
        self.delete_alias().alias_name(alias_name).send().await
    }

    async fn list_keys(
        &self,
        marker: Option<String>,
    ) -> Result<ListKeysOutput, SdkError<ListKeysError>> {
        self.list_keys().set_marker(marker).send().await
    }

    async fn describe_key(
        &self,
        key_id: &str,
    ) -> Result<DescribeKeyOutput, SdkError<DescribeKeyError>> {
        self.describe_key().key_id(key_id).send().await
    }

    async fn list_resource_tags(
        &self,
        key_id: &str,
    ) -> Result<ListResourceTagsOutput, SdkError<ListResourceTagsError>> {
        self.list_resource_tags().key_id(key_id).send().await
    }

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
    ) -> Result<ScheduleKeyDeletionOutput, SdkError<ScheduleKeyDeletionError>> {
        self.schedule_key_deletion()
            .key_id(key_id)
            .pending_window_in_days(PENDING_WINDOW_IN_DAYS)
            .send()
            .await
    }
}

// ---------------------------------------------------------------------------
// KMSAlias
// ---------------------------------------------------------------------------

pub struct KmsAliasLister {
    client: Option<Arc<dyn KmsApi>>,
}

impl KmsAliasLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn KmsApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for KmsAliasLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for KmsAliasLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn KmsApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = client.list_aliases(marker.clone()).await.map_err(|e| {
                let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                tracing::error!(
                    region = opts.region,
                    error_code = error_code,
                    error_message = error_message,
                    "KMS ListAliases API call failed: {} ({}).",
                    error_code,
                    error_message,
                );
                anyhow!(e).context("aws_sdk_kms::client::list_aliases() failed.")
            })?;

            for alias in output.aliases() {
                let Some(name) = alias.alias_name() else {
                    continue;
                };
                resources.push(Arc::new(KmsAlias {
                    client: client.clone(),
                    name: name.to_string(),
                    arn: alias.alias_arn().map(String::from),
                    target_key_id: alias.target_key_id().map(String::from),
                }));
            }

            if output.truncated().unwrap_or(false) {
                marker = output.next_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct KmsAlias {
    client: Arc<dyn KmsApi>,
    name: String,
    arn: Option<String>,
    target_key_id: Option<String>,
}

#[async_trait]
impl Resource for KmsAlias {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.delete_alias(&self.name).await {
            if sdk_error_code(&e) == Some("NotFoundException") {
                debug!(alias = %self.name, "alias already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_kms::client::delete_alias() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.name);
        properties.set_opt("ARN", self.arn.clone());
        properties.set_opt("TargetKeyId", self.target_key_id.clone());
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        self.name
            .starts_with(AWS_ALIAS_PREFIX)
            .then(|| "AWS-managed alias".to_string())
    }
}

impl fmt::Display for KmsAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// KMSKey
// ---------------------------------------------------------------------------

pub struct KmsKeyLister {
    client: Option<Arc<dyn KmsApi>>,
}

impl KmsKeyLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn KmsApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for KmsKeyLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for KmsKeyLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn KmsApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = client.list_keys(marker.clone()).await.map_err(|e| {
                let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                tracing::error!(
                    region = opts.region,
                    error_code = error_code,
                    error_message = error_message,
                    "KMS ListKeys API call failed: {} ({}).",
                    error_code,
                    error_message,
                );
                anyhow!(e).context("aws_sdk_kms::client::list_keys() failed.")
            })?;

            for entry in output.keys() {
                let Some(key_id) = entry.key_id() else {
                    continue;
                };

                let described = client.describe_key(key_id).await.map_err(|e| {
                    anyhow!(e).context("aws_sdk_kms::client::describe_key() failed.")
                })?;
                let metadata = described.key_metadata();

                // Tag fetch is best-effort: AWS-managed keys commonly deny it.
                let mut tags: Vec<(String, String)> = Vec::new();
                match client.list_resource_tags(key_id).await {
                    Ok(tag_output) => {
                        for tag in tag_output.tags() {
                            tags.push((tag.tag_key().to_string(), tag.tag_value().to_string()));
                        }
                    }
                    Err(e) => {
                        warn!(
                            key_id = key_id,
                            error = %e,
                            "could not fetch tags for key, continuing without them."
                        );
                    }
                }

                resources.push(Arc::new(KmsKey {
                    client: client.clone(),
                    key_id: key_id.to_string(),
                    arn: metadata.map(|m| m.arn().unwrap_or_default().to_string()),
                    manager: metadata.and_then(|m| m.key_manager().cloned()),
                    state: metadata.and_then(|m| m.key_state().cloned()),
                    description: metadata
                        .and_then(|m| m.description())
                        .map(String::from),
                    tags,
                }));
            }

            if output.truncated().unwrap_or(false) {
                marker = output.next_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct KmsKey {
    client: Arc<dyn KmsApi>,
    key_id: String,
    arn: Option<String>,
    manager: Option<KeyManagerType>,
    state: Option<KeyState>,
    description: Option<String>,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for KmsKey {
    /// Schedules the key for deletion. The actual deletion happens
    /// asynchronously after the pending window; a later scan pass observes
    /// the key gone (or pending) rather than this call blocking on it.
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.schedule_key_deletion(&self.key_id).await {
            match sdk_error_code(&e) {
                Some("NotFoundException") => {
                    debug!(key_id = %self.key_id, "key already removed.");
                    return Ok(());
                }
                Some("KMSInvalidStateException") => {
                    debug!(key_id = %self.key_id, "key deletion already pending.");
                    return Ok(());
                }
                _ => {
                    return Err(
                        anyhow!(e).context("aws_sdk_kms::client::schedule_key_deletion() failed.")
                    );
                }
            }
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("KeyId", &self.key_id);
        properties.set_opt("ARN", self.arn.clone());
        properties.set_opt("State", self.state.as_ref().map(|s| s.as_str().to_string()));
        properties.set_opt(
            "Manager",
            self.manager.as_ref().map(|m| m.as_str().to_string()),
        );
        properties.set_opt("Description", self.description.clone());
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        if self.manager == Some(KeyManagerType::Aws) {
            return Some("AWS-managed key".to_string());
        }
        if matches!(
            self.state,
            Some(KeyState::PendingDeletion) | Some(KeyState::PendingReplicaDeletion)
        ) {
            return Some("key deletion already pending".to_string());
        }
        None
    }
}

impl fmt::Display for KmsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_id)
    }
}
