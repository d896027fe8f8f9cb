//! App Mesh meshes and virtual nodes.
//!
//! Virtual nodes have no direct list API: discovery walks meshes → virtual
//! nodes per mesh (fixed-depth nested pagination). A mesh cannot be deleted
//! while it still contains virtual nodes, so `AppMeshMesh` depends on
//! `AppMeshVirtualNode` for removal ordering. App Mesh is not rolled out in
//! every region; capability errors become a soft skip.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_appmesh::Client;
use aws_sdk_appmesh::error::SdkError;
use aws_sdk_appmesh::operation::delete_mesh::DeleteMeshError;
use aws_sdk_appmesh::operation::delete_virtual_node::DeleteVirtualNodeError;
use aws_sdk_appmesh::operation::list_meshes::{ListMeshesError, ListMeshesOutput};
use aws_sdk_appmesh::operation::list_virtual_nodes::{
    ListVirtualNodesError, ListVirtualNodesOutput,
};
use tracing::debug;

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::error::SweepError;
use crate::types::properties::Properties;

pub const APP_MESH_MESH_TYPE: &str = "AppMeshMesh";
pub const APP_MESH_VIRTUAL_NODE_TYPE: &str = "AppMeshVirtualNode";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: APP_MESH_VIRTUAL_NODE_TYPE,
        scope: Scope::Region,
        lister: Arc::new(AppMeshVirtualNodeLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })?;
    registry.register(Registration {
        name: APP_MESH_MESH_TYPE,
        scope: Scope::Region,
        lister: Arc::new(AppMeshMeshLister::new()),
        depends_on: &[APP_MESH_VIRTUAL_NODE_TYPE],
        settings: &[],
        deprecated_aliases: &[],
    })
}

/// Minimal App Mesh surface used by the adapters.
#[async_trait]
pub(crate) trait AppMeshApi: Send + Sync {
    async fn list_meshes(
        &self,
        next_token: Option<String>,
    ) -> Result<ListMeshesOutput, SdkError<ListMeshesError>>;

    async fn list_virtual_nodes(
        &self,
        mesh_name: &str,
        next_token: Option<String>,
    ) -> Result<ListVirtualNodesOutput, SdkError<ListVirtualNodesError>>;

    async fn delete_virtual_node(
        &self,
        mesh_name: &str,
        virtual_node_name: &str,
    ) -> Result<(), SdkError<DeleteVirtualNodeError>>;

    async fn delete_mesh(&self, mesh_name: &str) -> Result<(), SdkError<DeleteMeshError>>;
}

#[async_trait]
impl AppMeshApi for Client {
    async fn list_meshes(
        &self,
        next_token: Option<String>,
    ) -> Result<ListMeshesOutput, SdkError<ListMeshesError>> {
        self.list_meshes().set_next_token(next_token).send().await
    }

    async fn list_virtual_nodes(
        &self,
        mesh_name: &str,
        next_token: Option<String>,
    ) -> Result<ListVirtualNodesOutput, SdkError<ListVirtualNodesError>> {
        self.list_virtual_nodes()
            .mesh_name(mesh_name)
            .set_next_token(next_token)
            .send()
            .await
    }

    async fn delete_virtual_node(
        &self,
        mesh_name: &str,
        virtual_node_name: &str,
    ) -> Result<(), SdkError<DeleteVirtualNodeError>> {
        self.delete_virtual_node()
            .mesh_name(mesh_name)
            .virtual_node_name(virtual_node_name)
            .send()
            .await
            .map(|_| ())
    }

    async fn delete_mesh(&self, mesh_name: &str) -> Result<(), SdkError<DeleteMeshError>> {
        self.delete_mesh().mesh_name(mesh_name).send().await.map(|_| ())
    }
}

/// Paginate all meshes, yielding `(mesh_name, resource_owner)` pairs.
async fn collect_meshes(
    client: &Arc<dyn AppMeshApi>,
    opts: &ListerOpts,
    resource_type: &str,
) -> Result<Vec<(String, String)>> {
    let mut meshes: Vec<(String, String)> = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let output = client.list_meshes(next_token.clone()).await.map_err(|e| {
            if crate::aws::is_unsupported_region_error(&e) {
                return anyhow!(SweepError::ListSkip {
                    resource_type: resource_type.to_string(),
                    reason: format!("App Mesh not available in {}", opts.region),
                });
            }
            let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
            tracing::error!(
                region = opts.region,
                error_code = error_code,
                error_message = error_message,
                "AppMesh ListMeshes API call failed: {} ({}).",
                error_code,
                error_message,
            );
            anyhow!(e).context("aws_sdk_appmesh::client::list_meshes() failed.")
        })?;

        for mesh in output.meshes() {
            meshes.push((
                mesh.mesh_name().to_string(),
                mesh.resource_owner().to_string(),
            ));
        }

        next_token = output.next_token().map(String::from);
        if next_token.is_none() {
            break;
        }
    }

    Ok(meshes)
}

// ---------------------------------------------------------------------------
// AppMeshMesh
// ---------------------------------------------------------------------------

pub struct AppMeshMeshLister {
    client: Option<Arc<dyn AppMeshApi>>,
}

impl AppMeshMeshLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn AppMeshApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for AppMeshMeshLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for AppMeshMeshLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn AppMeshApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        for (mesh_name, resource_owner) in
            collect_meshes(&client, opts, APP_MESH_MESH_TYPE).await?
        {
            resources.push(Arc::new(AppMeshMesh {
                client: client.clone(),
                name: mesh_name,
                resource_owner,
                account_id: opts.account_id.clone(),
            }));
        }
        Ok(resources)
    }
}

pub struct AppMeshMesh {
    client: Arc<dyn AppMeshApi>,
    name: String,
    resource_owner: String,
    account_id: String,
}

#[async_trait]
impl Resource for AppMeshMesh {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.delete_mesh(&self.name).await {
            if sdk_error_code(&e) == Some("NotFoundException") {
                debug!(mesh = %self.name, "mesh already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_appmesh::client::delete_mesh() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.name);
        properties.set("ResourceOwner", &self.resource_owner);
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        (self.resource_owner != self.account_id)
            .then(|| format!("shared mesh owned by {}", self.resource_owner))
    }
}

impl fmt::Display for AppMeshMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// AppMeshVirtualNode
// ---------------------------------------------------------------------------

pub struct AppMeshVirtualNodeLister {
    client: Option<Arc<dyn AppMeshApi>>,
}

impl AppMeshVirtualNodeLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn AppMeshApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for AppMeshVirtualNodeLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for AppMeshVirtualNodeLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn AppMeshApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();

        for (mesh_name, resource_owner) in
            collect_meshes(&client, opts, APP_MESH_VIRTUAL_NODE_TYPE).await?
        {
            // Virtual nodes in shared meshes belong to the mesh owner.
            if resource_owner != opts.account_id {
                continue;
            }

            let mut next_token: Option<String> = None;
            loop {
                let output = client
                    .list_virtual_nodes(&mesh_name, next_token.clone())
                    .await
                    .map_err(|e| {
                        anyhow!(e).context("aws_sdk_appmesh::client::list_virtual_nodes() failed.")
                    })?;

                for node in output.virtual_nodes() {
                    resources.push(Arc::new(AppMeshVirtualNode {
                        client: client.clone(),
                        mesh_name: mesh_name.clone(),
                        name: node.virtual_node_name().to_string(),
                        arn: node.arn().to_string(),
                    }));
                }

                next_token = output.next_token().map(String::from);
                if next_token.is_none() {
                    break;
                }
            }
        }

        Ok(resources)
    }
}

pub struct AppMeshVirtualNode {
    client: Arc<dyn AppMeshApi>,
    mesh_name: String,
    name: String,
    arn: String,
}

#[async_trait]
impl Resource for AppMeshVirtualNode {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self
            .client
            .delete_virtual_node(&self.mesh_name, &self.name)
            .await
        {
            if sdk_error_code(&e) == Some("NotFoundException") {
                debug!(
                    mesh = %self.mesh_name,
                    virtual_node = %self.name,
                    "virtual node already removed."
                );
                return Ok(());
            }
            return Err(
                anyhow!(e).context("aws_sdk_appmesh::client::delete_virtual_node() failed.")
            );
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("MeshName", &self.mesh_name);
        properties.set("Name", &self.name);
        properties.set("ARN", &self.arn);
        properties
    }
}

impl fmt::Display for AppMeshVirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.mesh_name, self.name)
    }
}
