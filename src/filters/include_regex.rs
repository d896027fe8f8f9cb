//! Include regex filter stage.
//!
//! Passes resources whose display identifier matches the configured include
//! regex pattern.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::FilterConfig;
use crate::filters::{ResourceFilter, ResourceFilterBase};
use crate::resource::ScannedResource;
use crate::stage::Stage;

pub struct IncludeRegexFilter<'a> {
    base: ResourceFilterBase<'a>,
}

const FILTER_NAME: &str = "IncludeRegexFilter";

impl IncludeRegexFilter<'_> {
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
impl ResourceFilter for IncludeRegexFilter<'_> {
    async fn filter(&self) -> Result<()> {
        self.base.filter(skip_reason).await
    }
}

fn skip_reason(scanned: &ScannedResource, config: &FilterConfig) -> Option<String> {
    let include_regex = config.include_regex.as_ref().unwrap();
    if include_regex.is_match(&scanned.id()).unwrap_or(false) {
        None
    } else {
        Some(format!(
            "id does not match include regex '{}'",
            include_regex.as_str()
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::{init_dummy_tracing_subscriber, make_scanned_resource};
    use fancy_regex::Regex;

    #[test]
    fn matching_id_passes() {
        init_dummy_tracing_subscriber();

        let config = FilterConfig {
            include_regex: Some(Regex::new(r"^prod-.*").unwrap()),
            ..Default::default()
        };

        assert!(skip_reason(&make_scanned_resource("MockResource", "prod-db"), &config).is_none());
    }

    #[test]
    fn non_matching_id_is_skipped() {
        init_dummy_tracing_subscriber();

        let config = FilterConfig {
            include_regex: Some(Regex::new(r"^prod-.*").unwrap()),
            ..Default::default()
        };

        let reason = skip_reason(&make_scanned_resource("MockResource", "staging-db"), &config);
        assert!(reason.unwrap().contains("include regex"));
    }
}
