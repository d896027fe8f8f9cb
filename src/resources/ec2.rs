//! EC2 security groups and instances.
//!
//! Instances honor the `DisableDeletionProtection` setting: a termination
//! rejected by API termination protection is retried once after disabling
//! the protection attribute, but only when the setting is enabled.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::error::SdkError;
use aws_sdk_ec2::operation::delete_security_group::{
    DeleteSecurityGroupError, DeleteSecurityGroupOutput,
};
use aws_sdk_ec2::operation::describe_instances::{DescribeInstancesError, DescribeInstancesOutput};
use aws_sdk_ec2::operation::describe_security_groups::{
    DescribeSecurityGroupsError, DescribeSecurityGroupsOutput,
};
use aws_sdk_ec2::operation::modify_instance_attribute::{
    ModifyInstanceAttributeError, ModifyInstanceAttributeOutput,
};
use aws_sdk_ec2::operation::terminate_instances::{
    TerminateInstancesError, TerminateInstancesOutput,
};
use aws_sdk_ec2::types::{AttributeBooleanValue, InstanceStateName};
use tracing::{debug, info};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const EC2_SECURITY_GROUP_TYPE: &str = "EC2SecurityGroup";
pub const EC2_INSTANCE_TYPE: &str = "EC2Instance";

pub const DISABLE_DELETION_PROTECTION_SETTING: &str = "DisableDeletionProtection";

const DEFAULT_SECURITY_GROUP_NAME: &str = "default";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: EC2_INSTANCE_TYPE,
        scope: Scope::Region,
        lister: Arc::new(Ec2InstanceLister::new()),
        depends_on: &[],
        settings: &[DISABLE_DELETION_PROTECTION_SETTING],
        deprecated_aliases: &[],
    })?;
    registry.register(Registration {
        name: EC2_SECURITY_GROUP_TYPE,
        scope: Scope::Region,
        // Groups cannot be deleted while attached to running instances.
        lister: Arc::new(Ec2SecurityGroupLister::new()),
        depends_on: &[EC2_INSTANCE_TYPE],
        settings: &[],
        deprecated_aliases: &[],
    })
}

/// Minimal EC2 surface used by the adapters.
#[async_trait]
pub(crate) trait Ec2Api: Send + Sync {
    async fn describe_security_groups(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeSecurityGroupsOutput, SdkError<DescribeSecurityGroupsError>>;

    async fn delete_security_group(
        &self,
        group_id: &str,
    ) -> Result<DeleteSecurityGroupOutput, SdkError<DeleteSecurityGroupError>>;

    async fn describe_instances(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeInstancesOutput, SdkError<DescribeInstancesError>>;

    async fn terminate_instances(
        &self,
        instance_id: &str,
    ) -> Result<TerminateInstancesOutput, SdkError<TerminateInstancesError>>;

    async fn disable_api_termination(
        &self,
        instance_id: &str,
    ) -> Result<ModifyInstanceAttributeOutput, SdkError<ModifyInstanceAttributeError>>;
}

#[async_trait]
impl Ec2Api for Client {
    async fn describe_security_groups(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeSecurityGroupsOutput, SdkError<DescribeSecurityGroupsError>> {
        self.describe_security_groups()
            .set_next_token(next_token)
            .send()
            .await
    }

    async fn delete_security_group(
        &self,
        group_id: &str,
    ) -> Result<DeleteSecurityGroupOutput, SdkError<DeleteSecurityGroupError>> {
        self.delete_security_group()
            .group_id(group_id)
            .send()
            .await
    }

    async fn describe_instances(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeInstancesOutput, SdkError<DescribeInstancesError>> {
        self.describe_instances()
            .set_next_token(next_token)
            .send()
            .await
    }

    async fn terminate_instances(
        &self,
        instance_id: &str,
    ) -> Result<TerminateInstancesOutput, SdkError<TerminateInstancesError>> {
        self.terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
    }

    async fn disable_api_termination(
        &self,
        instance_id: &str,
    ) -> Result<ModifyInstanceAttributeOutput, SdkError<ModifyInstanceAttributeError>> {
        self.modify_instance_attribute()
            .instance_id(instance_id)
            .disable_api_termination(AttributeBooleanValue::builder().value(false).build())
            .send()
            .await
    }
}

// ---------------------------------------------------------------------------
// EC2SecurityGroup
// ---------------------------------------------------------------------------

pub struct Ec2SecurityGroupLister {
    client: Option<Arc<dyn Ec2Api>>,
}

impl Ec2SecurityGroupLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn Ec2Api>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for Ec2SecurityGroupLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for Ec2SecurityGroupLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn Ec2Api> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .describe_security_groups(next_token.clone())
                .await
                .map_err(|e| {
                    let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                    tracing::error!(
                        region = opts.region,
                        error_code = error_code,
                        error_message = error_message,
                        "EC2 DescribeSecurityGroups API call failed: {} ({}).",
                        error_code,
                        error_message,
                    );
                    anyhow!(e).context("aws_sdk_ec2::client::describe_security_groups() failed.")
                })?;

            for group in output.security_groups() {
                let Some(group_id) = group.group_id() else {
                    continue;
                };
                resources.push(Arc::new(Ec2SecurityGroup {
                    client: client.clone(),
                    group_id: group_id.to_string(),
                    group_name: group.group_name().unwrap_or_default().to_string(),
                    owner_id: group.owner_id().map(String::from),
                    vpc_id: group.vpc_id().map(String::from),
                    account_id: opts.account_id.clone(),
                    tags: group
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

pub struct Ec2SecurityGroup {
    client: Arc<dyn Ec2Api>,
    group_id: String,
    group_name: String,
    owner_id: Option<String>,
    vpc_id: Option<String>,
    account_id: String,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for Ec2SecurityGroup {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.delete_security_group(&self.group_id).await {
            if sdk_error_code(&e) == Some("InvalidGroup.NotFound") {
                debug!(group_id = %self.group_id, "security group already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_ec2::client::delete_security_group() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("GroupId", &self.group_id);
        properties.set("GroupName", &self.group_name);
        properties.set_opt("OwnerId", self.owner_id.clone());
        properties.set_opt("VpcId", self.vpc_id.clone());
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        if let Some(owner_id) = &self.owner_id {
            if owner_id != &self.account_id {
                return Some(format!("not owned by the target account ({owner_id})"));
            }
        }
        if self.group_name == DEFAULT_SECURITY_GROUP_NAME {
            return Some("default VPC security group cannot be deleted".to_string());
        }
        None
    }
}

impl fmt::Display for Ec2SecurityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.group_id)
    }
}

// ---------------------------------------------------------------------------
// EC2Instance
// ---------------------------------------------------------------------------

pub struct Ec2InstanceLister {
    client: Option<Arc<dyn Ec2Api>>,
}

impl Ec2InstanceLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn Ec2Api>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for Ec2InstanceLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for Ec2InstanceLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn Ec2Api> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let disable_protection = opts
            .settings
            .is_enabled(EC2_INSTANCE_TYPE, DISABLE_DELETION_PROTECTION_SETTING);

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .describe_instances(next_token.clone())
                .await
                .map_err(|e| {
                    let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                    tracing::error!(
                        region = opts.region,
                        error_code = error_code,
                        error_message = error_message,
                        "EC2 DescribeInstances API call failed: {} ({}).",
                        error_code,
                        error_message,
                    );
                    anyhow!(e).context("aws_sdk_ec2::client::describe_instances() failed.")
                })?;

            for reservation in output.reservations() {
                for instance in reservation.instances() {
                    let Some(instance_id) = instance.instance_id() else {
                        continue;
                    };
                    resources.push(Arc::new(Ec2Instance {
                        client: client.clone(),
                        instance_id: instance_id.to_string(),
                        state: instance
                            .state()
                            .and_then(|s| s.name())
                            .cloned(),
                        instance_type: instance
                            .instance_type()
                            .map(|t| t.as_str().to_string()),
                        disable_protection,
                        tags: instance
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
            }

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct Ec2Instance {
    client: Arc<dyn Ec2Api>,
    instance_id: String,
    state: Option<InstanceStateName>,
    instance_type: Option<String>,
    /// Resolved `DisableDeletionProtection` setting, baked in at list time.
    disable_protection: bool,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for Ec2Instance {
    async fn remove(&self) -> Result<()> {
        match self.client.terminate_instances(&self.instance_id).await {
            Ok(_) => Ok(()),
            Err(e) if sdk_error_code(&e) == Some("OperationNotPermitted") => {
                if !self.disable_protection {
                    return Err(anyhow!(e)
                        .context("aws_sdk_ec2::client::terminate_instances() failed."));
                }

                info!(
                    instance_id = %self.instance_id,
                    "disabling API termination protection before retrying."
                );
                self.client
                    .disable_api_termination(&self.instance_id)
                    .await
                    .map_err(|e| {
                        anyhow!(e)
                            .context("aws_sdk_ec2::client::modify_instance_attribute() failed.")
                    })?;

                self.client
                    .terminate_instances(&self.instance_id)
                    .await
                    .map_err(|e| {
                        anyhow!(e).context("aws_sdk_ec2::client::terminate_instances() failed.")
                    })?;
                Ok(())
            }
            Err(e) => {
                Err(anyhow!(e).context("aws_sdk_ec2::client::terminate_instances() failed."))
            }
        }
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("InstanceId", &self.instance_id);
        properties.set_opt("State", self.state.as_ref().map(|s| s.as_str().to_string()));
        properties.set_opt("InstanceType", self.instance_type.clone());
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        matches!(
            self.state,
            Some(InstanceStateName::Terminated) | Some(InstanceStateName::ShuttingDown)
        )
        .then(|| "instance is already terminating".to_string())
    }
}

impl fmt::Display for Ec2Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance_id)
    }
}
