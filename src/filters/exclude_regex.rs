//! Exclude regex filter stage.
//!
//! Skips resources whose display identifier matches the configured exclude
//! regex pattern.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::FilterConfig;
use crate::filters::{ResourceFilter, ResourceFilterBase};
use crate::resource::ScannedResource;
use crate::stage::Stage;

pub struct ExcludeRegexFilter<'a> {
    base: ResourceFilterBase<'a>,
}

const FILTER_NAME: &str = "ExcludeRegexFilter";

impl ExcludeRegexFilter<'_> {
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
impl ResourceFilter for ExcludeRegexFilter<'_> {
    async fn filter(&self) -> Result<()> {
        self.base.filter(skip_reason).await
    }
}

fn skip_reason(scanned: &ScannedResource, config: &FilterConfig) -> Option<String> {
    let exclude_regex = config.exclude_regex.as_ref().unwrap();
    if exclude_regex.is_match(&scanned.id()).unwrap_or(false) {
        Some(format!(
            "id matches exclude regex '{}'",
            exclude_regex.as_str()
        ))
    } else {
        None
    }
}
