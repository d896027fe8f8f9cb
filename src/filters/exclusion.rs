//! Self-exclusion filter stage.
//!
//! Consults each resource's [`filter_reason`](crate::resource::Resource::filter_reason):
//! resources that must never be offered for deletion (AWS-owned defaults,
//! foreign-account objects, not-yet-active subscriptions) are skipped here.
//! This stage is always active.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::FilterConfig;
use crate::filters::{ResourceFilter, ResourceFilterBase};
use crate::resource::ScannedResource;
use crate::stage::Stage;

pub struct ExclusionFilter<'a> {
    base: ResourceFilterBase<'a>,
}

const FILTER_NAME: &str = "ExclusionFilter";

impl ExclusionFilter<'_> {
    pub fn new(base: Stage) -> Self {
        Self {
            base: ResourceFilterBase {
                base,
                name: FILTER_NAME,
            },
        }
    }
}

#[async_trait]
impl ResourceFilter for ExclusionFilter<'_> {
    async fn filter(&self) -> Result<()> {
        self.base.filter(exclusion_reason).await
    }
}

fn exclusion_reason(scanned: &ScannedResource, _config: &FilterConfig) -> Option<String> {
    scanned.resource.filter_reason()
}
