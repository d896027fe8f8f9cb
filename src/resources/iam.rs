//! IAM roles and managed-policy attachments.
//!
//! Attachments have no direct list API: they are discovered by walking
//! roles → attached policies. A role cannot be deleted while policies are
//! attached, so `IAMRole` depends on `IAMRolePolicyAttachment` for removal
//! ordering. Service-linked roles are AWS-owned and never offered.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_iam::Client;
use aws_sdk_iam::error::SdkError;
use aws_sdk_iam::operation::delete_role::{DeleteRoleError, DeleteRoleOutput};
use aws_sdk_iam::operation::detach_role_policy::{DetachRolePolicyError, DetachRolePolicyOutput};
use aws_sdk_iam::operation::list_attached_role_policies::{
    ListAttachedRolePoliciesError, ListAttachedRolePoliciesOutput,
};
use aws_sdk_iam::operation::list_role_tags::{ListRoleTagsError, ListRoleTagsOutput};
use aws_sdk_iam::operation::list_roles::{ListRolesError, ListRolesOutput};
use tracing::{debug, warn};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const IAM_ROLE_TYPE: &str = "IAMRole";
pub const IAM_ROLE_POLICY_ATTACHMENT_TYPE: &str = "IAMRolePolicyAttachment";

const SERVICE_ROLE_PATH_PREFIX: &str = "/aws-service-role/";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: IAM_ROLE_POLICY_ATTACHMENT_TYPE,
        scope: Scope::Account,
        lister: Arc::new(IamRolePolicyAttachmentLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })?;
    registry.register(Registration {
        name: IAM_ROLE_TYPE,
        scope: Scope::Account,
        lister: Arc::new(IamRoleLister::new()),
        depends_on: &[IAM_ROLE_POLICY_ATTACHMENT_TYPE],
        settings: &[],
        deprecated_aliases: &["IamRole"],
    })
}

/// Minimal IAM surface used by the adapters.
#[async_trait]
pub(crate) trait IamApi: Send + Sync {
    async fn list_roles(
        &self,
        marker: Option<String>,
    ) -> Result<ListRolesOutput, SdkError<ListRolesError>>;

    async fn list_role_tags(
        &self,
        role_name: &str,
    ) -> Result<ListRoleTagsOutput, SdkError<ListRoleTagsError>>;

    async fn delete_role(
        &self,
        role_name: &str,
    ) -> Result<DeleteRoleOutput, SdkError<DeleteRoleError>>;

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<ListAttachedRolePoliciesOutput, SdkError<ListAttachedRolePoliciesError>>;

    async fn detach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<DetachRolePolicyOutput, SdkError<DetachRolePolicyError>>;
}

#[async_trait]
impl IamApi for Client {
    async fn list_roles(
        &self,
        marker: Option<String>,
    ) -> Result<ListRolesOutput, SdkError<ListRolesError>> {
        self.list_roles().set_marker(marker).send().await
    }

    async fn list_role_tags(
        &self,
        role_name: &str,
    ) -> Result<ListRoleTagsOutput, SdkError<ListRoleTagsError>> {
        self.list_role_tags().role_name(role_name).send().await
    }

    async fn delete_role(
        &self,
        role_name: &str,
    ) -> Result<DeleteRoleOutput, SdkError<DeleteRoleError>> {
        self.delete_role().role_name(role_name).send().await
    }

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<ListAttachedRolePoliciesOutput, SdkError<ListAttachedRolePoliciesError>> {
        self.list_attached_role_policies()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
    }

    async fn detach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<DetachRolePolicyOutput, SdkError<DetachRolePolicyError>> {
        self.detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
    }
}

/// Paginate all roles, yielding `(name, path)` pairs. Shared by the role
/// lister and the attachment lister, which walks these as parents.
async fn collect_roles(client: &Arc<dyn IamApi>) -> Result<Vec<(String, String)>> {
    let mut roles: Vec<(String, String)> = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let output = client.list_roles(marker.clone()).await.map_err(|e| {
            let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
            tracing::error!(
                error_code = error_code,
                error_message = error_message,
                "IAM ListRoles API call failed: {} ({}).",
                error_code,
                error_message,
            );
            anyhow!(e).context("aws_sdk_iam::client::list_roles() failed.")
        })?;

        for role in output.roles() {
            roles.push((role.role_name().to_string(), role.path().to_string()));
        }

        if output.is_truncated() {
            marker = output.marker().map(String::from);
        } else {
            break;
        }
    }

    Ok(roles)
}

// ---------------------------------------------------------------------------
// IAMRole
// ---------------------------------------------------------------------------

pub struct IamRoleLister {
    client: Option<Arc<dyn IamApi>>,
}

impl IamRoleLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn IamApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for IamRoleLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for IamRoleLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn IamApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();

        for (role_name, path) in collect_roles(&client).await? {
            // Tag fetch is best-effort.
            let mut tags: Vec<(String, String)> = Vec::new();
            if !path.starts_with(SERVICE_ROLE_PATH_PREFIX) {
                match client.list_role_tags(&role_name).await {
                    Ok(tag_output) => {
                        for tag in tag_output.tags() {
                            tags.push((tag.key().to_string(), tag.value().to_string()));
                        }
                    }
                    Err(e) => {
                        warn!(
                            role = role_name,
                            error = %e,
                            "could not fetch tags for role, continuing without them."
                        );
                    }
                }
            }

            resources.push(Arc::new(IamRole {
                client: client.clone(),
                name: role_name,
                path,
                tags,
            }));
        }

        Ok(resources)
    }
}

pub struct IamRole {
    client: Arc<dyn IamApi>,
    name: String,
    path: String,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for IamRole {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.delete_role(&self.name).await {
            if sdk_error_code(&e) == Some("NoSuchEntity") {
                debug!(role = %self.name, "role already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_iam::client::delete_role() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.name);
        properties.set("Path", &self.path);
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        self.path
            .starts_with(SERVICE_ROLE_PATH_PREFIX)
            .then(|| "service-linked role".to_string())
    }
}

impl fmt::Display for IamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// IAMRolePolicyAttachment
// ---------------------------------------------------------------------------

pub struct IamRolePolicyAttachmentLister {
    client: Option<Arc<dyn IamApi>>,
}

impl IamRolePolicyAttachmentLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn IamApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for IamRolePolicyAttachmentLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for IamRolePolicyAttachmentLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn IamApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();

        for (role_name, path) in collect_roles(&client).await? {
            // Policies on service-linked roles are AWS-managed; detaching
            // them is rejected anyway.
            if path.starts_with(SERVICE_ROLE_PATH_PREFIX) {
                continue;
            }

            let mut marker: Option<String> = None;
            loop {
                let output = client
                    .list_attached_role_policies(&role_name, marker.clone())
                    .await
                    .map_err(|e| {
                        anyhow!(e).context(
                            "aws_sdk_iam::client::list_attached_role_policies() failed.",
                        )
                    })?;

                for policy in output.attached_policies() {
                    let Some(policy_arn) = policy.policy_arn() else {
                        continue;
                    };
                    resources.push(Arc::new(IamRolePolicyAttachment {
                        client: client.clone(),
                        role_name: role_name.clone(),
                        policy_name: policy.policy_name().unwrap_or_default().to_string(),
                        policy_arn: policy_arn.to_string(),
                    }));
                }

                if output.is_truncated() {
                    marker = output.marker().map(String::from);
                } else {
                    break;
                }
            }
        }

        Ok(resources)
    }
}

pub struct IamRolePolicyAttachment {
    client: Arc<dyn IamApi>,
    role_name: String,
    policy_name: String,
    policy_arn: String,
}

#[async_trait]
impl Resource for IamRolePolicyAttachment {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self
            .client
            .detach_role_policy(&self.role_name, &self.policy_arn)
            .await
        {
            if sdk_error_code(&e) == Some("NoSuchEntity") {
                debug!(
                    role = %self.role_name,
                    policy = %self.policy_arn,
                    "policy attachment already removed."
                );
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_iam::client::detach_role_policy() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("RoleName", &self.role_name);
        properties.set("PolicyName", &self.policy_name);
        properties.set("PolicyArn", &self.policy_arn);
        properties
    }
}

impl fmt::Display for IamRolePolicyAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.role_name, self.policy_name)
    }
}
