//! Secrets Manager secrets, including cross-region replicas.
//!
//! A secret discovered in a non-primary region is a replica: only the
//! primary region can mutate replication topology, so its removal routes
//! through a client bound to the primary region and calls
//! `RemoveRegionsFromReplication` instead of a direct delete.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_secretsmanager::Client;
use aws_sdk_secretsmanager::config::Region;
use aws_sdk_secretsmanager::error::SdkError;
use aws_sdk_secretsmanager::operation::delete_secret::{DeleteSecretError, DeleteSecretOutput};
use aws_sdk_secretsmanager::operation::list_secrets::{ListSecretsError, ListSecretsOutput};
use aws_sdk_secretsmanager::operation::remove_regions_from_replication::{
    RemoveRegionsFromReplicationError, RemoveRegionsFromReplicationOutput,
};
use tracing::debug;

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const SECRETSMANAGER_SECRET_TYPE: &str = "SecretsManagerSecret";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: SECRETSMANAGER_SECRET_TYPE,
        scope: Scope::Region,
        lister: Arc::new(SecretsManagerSecretLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })
}

/// Minimal Secrets Manager surface used by the adapter.
#[async_trait]
pub(crate) trait SecretsManagerApi: Send + Sync {
    async fn list_secrets(
        &self,
        next_token: Option<String>,
    ) -> Result<ListSecretsOutput, SdkError<ListSecretsError>>;

    async fn delete_secret(
        &self,
        secret_id: &str,
    ) -> Result<DeleteSecretOutput, SdkError<DeleteSecretError>>;

    async fn remove_regions_from_replication(
        &self,
        secret_id: &str,
        replica_region: &str,
    ) -> Result<RemoveRegionsFromReplicationOutput, SdkError<RemoveRegionsFromReplicationError>>;
}

#[async_trait]
impl SecretsManagerApi for Client {
    async fn list_secrets(
        &self,
        next_token: Option<String>,
    ) -> Result<ListSecretsOutput, SdkError<ListSecretsError>> {
        self.list_secrets().set_next_token(next_token).send().await
    }

    async fn delete_secret(
        &self,
        secret_id: &str,
    ) -> Result<DeleteSecretOutput, SdkError<DeleteSecretError>> {
        self.delete_secret()
            .secret_id(secret_id)
            .force_delete_without_recovery(true)
            .send()
            .await
    }

    async fn remove_regions_from_replication(
        &self,
        secret_id: &str,
        replica_region: &str,
    ) -> Result<RemoveRegionsFromReplicationOutput, SdkError<RemoveRegionsFromReplicationError>>
    {
        self.remove_regions_from_replication()
            .secret_id(secret_id)
            .remove_replica_regions(replica_region)
            .send()
            .await
    }
}

pub struct SecretsManagerSecretLister {
    client: Option<Arc<dyn SecretsManagerApi>>,
    /// Test override for the primary-region client used by replicas.
    primary_client: Option<Arc<dyn SecretsManagerApi>>,
}

impl SecretsManagerSecretLister {
    pub fn new() -> Self {
        Self {
            client: None,
            primary_client: None,
        }
    }

    #[cfg(test)]
    fn with_clients(
        client: Arc<dyn SecretsManagerApi>,
        primary_client: Arc<dyn SecretsManagerApi>,
    ) -> Self {
        Self {
            client: Some(client),
            primary_client: Some(primary_client),
        }
    }
}

impl Default for SecretsManagerSecretLister {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretsManagerSecretLister {
    /// Client bound to a replica's primary region. Cached per region since
    /// several replicas usually share one primary.
    fn primary_region_client(
        &self,
        opts: &ListerOpts,
        primary_region: &str,
        cache: &mut HashMap<String, Arc<dyn SecretsManagerApi>>,
    ) -> Arc<dyn SecretsManagerApi> {
        if let Some(primary_client) = &self.primary_client {
            return primary_client.clone();
        }
        cache
            .entry(primary_region.to_string())
            .or_insert_with(|| {
                let config = aws_sdk_secretsmanager::config::Builder::from(&opts.sdk_config)
                    .region(Region::new(primary_region.to_string()))
                    .build();
                Arc::new(Client::from_conf(config))
            })
            .clone()
    }
}

#[async_trait]
impl ResourceLister for SecretsManagerSecretLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn SecretsManagerApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut primary_clients: HashMap<String, Arc<dyn SecretsManagerApi>> = HashMap::new();
        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client.list_secrets(next_token.clone()).await.map_err(|e| {
                let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                tracing::error!(
                    region = opts.region,
                    error_code = error_code,
                    error_message = error_message,
                    "SecretsManager ListSecrets API call failed: {} ({}).",
                    error_code,
                    error_message,
                );
                anyhow!(e).context("aws_sdk_secretsmanager::client::list_secrets() failed.")
            })?;

            for entry in output.secret_list() {
                let Some(name) = entry.name() else {
                    continue;
                };

                let primary_region = entry.primary_region().map(String::from);
                let replica = primary_region
                    .as_deref()
                    .is_some_and(|primary| primary != opts.region);

                let removal_client = if replica {
                    self.primary_region_client(
                        opts,
                        primary_region.as_deref().unwrap(),
                        &mut primary_clients,
                    )
                } else {
                    client.clone()
                };

                resources.push(Arc::new(SecretsManagerSecret {
                    client: removal_client,
                    name: name.to_string(),
                    arn: entry.arn().map(String::from),
                    region: opts.region.clone(),
                    primary_region,
                    replica,
                    tags: entry
                        .tags()
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

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct SecretsManagerSecret {
    /// Bound to the primary region for replicas, the local region otherwise.
    client: Arc<dyn SecretsManagerApi>,
    name: String,
    arn: Option<String>,
    region: String,
    primary_region: Option<String>,
    replica: bool,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for SecretsManagerSecret {
    async fn remove(&self) -> Result<()> {
        if self.replica {
            debug!(
                secret = %self.name,
                region = self.region,
                primary_region = self.primary_region.as_deref(),
                "removing replica region from replication via the primary region."
            );
            self.client
                .remove_regions_from_replication(&self.name, &self.region)
                .await
                .map_err(|e| {
                    anyhow!(e).context(
                        "aws_sdk_secretsmanager::client::remove_regions_from_replication() failed.",
                    )
                })?;
            return Ok(());
        }

        if let Err(e) = self.client.delete_secret(&self.name).await {
            match sdk_error_code(&e) {
                Some("ResourceNotFoundException") => {
                    debug!(secret = %self.name, "secret already removed.");
                    return Ok(());
                }
                Some("InvalidRequestException") => {
                    // Deletion already scheduled.
                    debug!(secret = %self.name, "secret deletion already scheduled.");
                    return Ok(());
                }
                _ => {
                    return Err(
                        anyhow!(e).context("aws_sdk_secretsmanager::client::delete_secret() failed.")
                    );
                }
            }
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.name);
        properties.set_opt("ARN", self.arn.clone());
        properties.set("Region", &self.region);
        properties.set_opt("PrimaryRegion", self.primary_region.clone());
        properties.set("Replica", if self.replica { "true" } else { "false" });
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }
}

impl fmt::Display for SecretsManagerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
