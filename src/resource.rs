//! The resource adapter contract: every supported AWS resource type is a
//! [`ResourceLister`] that enumerates live instances and a [`Resource`]
//! wrapper exposing removal, a properties bag, and a display identifier.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_config::SdkConfig;

use crate::config::Settings;
use crate::types::properties::Properties;

/// Options passed to every lister invocation: the loaded SDK config bound to
/// the region being scanned, the region name, the resolved account ID, and
/// the per-resource-type settings.
///
/// Listers resolve the settings relevant to their type here and bake the
/// booleans into each constructed resource; resources are immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct ListerOpts {
    pub sdk_config: SdkConfig,
    pub region: String,
    pub account_id: String,
    pub settings: Settings,
}

/// A handle to one live AWS object.
///
/// `Display` renders the primary identifier verbatim (name, ID, or ARN);
/// attachment-style resources render `"parent -> child"`.
#[async_trait]
pub trait Resource: fmt::Display + Send + Sync {
    /// Issue the delete/terminate/deregister API call for this instance.
    ///
    /// Known idempotent-delete error codes (not-found, already-deleting) are
    /// swallowed to `Ok(())`. For resources whose delete API only initiates
    /// an asynchronous transition, success means "transition started".
    async fn remove(&self) -> Result<()>;

    /// The descriptive bag used for filter matching and display. Pure
    /// function of already-loaded fields; no I/O.
    fn properties(&self) -> Properties;

    /// Resources that must never be offered for deletion (AWS-owned
    /// defaults, foreign-account objects, terminal states) return the
    /// reason; all others return `None`.
    fn filter_reason(&self) -> Option<String> {
        None
    }
}

/// Stateless enumerator for one resource type.
///
/// Each invocation paginates the service's list/describe API to exhaustion
/// and returns fresh resources; no pagination state persists across calls.
/// Listing is read-only.
#[async_trait]
pub trait ResourceLister: Send + Sync {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>>;
}

/// A resource discovered by the scanner, tagged with its type and region for
/// filtering, statistics, and display.
#[derive(Clone)]
pub struct ScannedResource {
    pub resource_type: &'static str,
    pub region: String,
    pub resource: Arc<dyn Resource>,
}

impl ScannedResource {
    /// The resource's display identifier.
    pub fn id(&self) -> String {
        self.resource.to_string()
    }
}

impl fmt::Debug for ScannedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannedResource")
            .field("resource_type", &self.resource_type)
            .field("region", &self.region)
            .field("id", &self.id())
            .finish()
    }
}
