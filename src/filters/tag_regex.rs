//! Tag regex filter stage.
//!
//! Matches the configured include/exclude tag regexes against the canonical
//! tag string derived from the resource's properties bag
//! (`key1=value1&key2=value2`, keys sorted alphabetically). Both rules are
//! applied by the one stage; include is checked before exclude.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::FilterConfig;
use crate::filters::{ResourceFilter, ResourceFilterBase};
use crate::resource::ScannedResource;
use crate::stage::Stage;

pub struct TagRegexFilter<'a> {
    base: ResourceFilterBase<'a>,
}

const FILTER_NAME: &str = "TagRegexFilter";

impl TagRegexFilter<'_> {
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
impl ResourceFilter for TagRegexFilter<'_> {
    async fn filter(&self) -> Result<()> {
        self.base.filter(skip_reason).await
    }
}

fn skip_reason(scanned: &ScannedResource, config: &FilterConfig) -> Option<String> {
    let tag_string = scanned.resource.properties().tag_string();

    if let Some(include_tag_regex) = &config.include_tag_regex {
        if !include_tag_regex.is_match(&tag_string).unwrap_or(false) {
            return Some(format!(
                "tags '{}' do not match include tag regex '{}'",
                tag_string,
                include_tag_regex.as_str()
            ));
        }
    }

    if let Some(exclude_tag_regex) = &config.exclude_tag_regex {
        if exclude_tag_regex.is_match(&tag_string).unwrap_or(false) {
            return Some(format!(
                "tags '{}' match exclude tag regex '{}'",
                tag_string,
                exclude_tag_regex.as_str()
            ));
        }
    }

    None
}
