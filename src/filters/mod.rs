//! Filter stages for the sweep pipeline.
//!
//! Each filter reads scanned resources from its input channel, applies its
//! rule, and forwards surviving resources to its output channel. Filters are
//! chained in sequence with logical AND semantics; a resource skipped by any
//! filter emits a `RemoveSkip` statistic and goes no further.
//!
//! The exclusion filter (per-resource self-exclusion) is always active; the
//! regex and tag filters are only spawned when configured.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::FilterConfig;
use crate::resource::ScannedResource;
use crate::stage::{SendResult, Stage};
use crate::types::SweepStatistics;

pub mod exclude_regex;
pub mod exclusion;
pub mod include_regex;
pub mod tag_regex;

pub use exclude_regex::ExcludeRegexFilter;
pub use exclusion::ExclusionFilter;
pub use include_regex::IncludeRegexFilter;
pub use tag_regex::TagRegexFilter;

/// Trait implemented by all filter stages in the sweep pipeline.
#[async_trait]
pub trait ResourceFilter {
    async fn filter(&self) -> Result<()>;
}

/// Base implementation of the receive-and-filter loop shared by all filters.
///
/// The filter function returns `None` to pass a resource through, or
/// `Some(reason)` to skip it.
pub struct ResourceFilterBase<'a> {
    name: &'a str,
    base: Stage,
}

impl ResourceFilterBase<'_> {
    async fn receive_and_filter<F>(&self, filter_fn: F) -> Result<()>
    where
        F: Fn(&ScannedResource, &FilterConfig) -> Option<String>,
    {
        // Yield to prevent task starvation under high load.
        loop {
            tokio::task::yield_now().await;
            if self.base.cancellation_token.is_cancelled() {
                debug!(name = self.name, "filter has been cancelled.");
                return Ok(());
            }

            tokio::task::yield_now().await;
            match self.base.receiver.as_ref().unwrap().recv().await {
                Ok(scanned) => {
                    tokio::task::yield_now().await;
                    if let Some(reason) = filter_fn(&scanned, &self.base.config.filter_config) {
                        debug!(
                            name = self.name,
                            resource_type = scanned.resource_type,
                            id = %scanned.id(),
                            reason = reason,
                            "resource filtered."
                        );
                        self.base.stats_report.add_skipped();
                        self.base
                            .send_stats(SweepStatistics::RemoveSkip {
                                resource_type: scanned.resource_type,
                                id: scanned.id(),
                                reason,
                            })
                            .await;
                        continue;
                    }

                    tokio::task::yield_now().await;
                    if self.base.send(scanned).await? == SendResult::Closed {
                        return Ok(());
                    }
                }
                Err(_) => {
                    debug!(name = self.name, "filter has been completed.");
                    return Ok(());
                }
            }
        }
    }

    pub async fn filter<F>(&self, filter_fn: F) -> Result<()>
    where
        F: Fn(&ScannedResource, &FilterConfig) -> Option<String>,
    {
        self.receive_and_filter(filter_fn).await
    }
}
