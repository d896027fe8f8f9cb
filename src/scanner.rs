//! Resource scanner: the entry stage of the sweep pipeline.
//!
//! Walks the configured regions and the dependency-ordered registry,
//! invokes each selected lister, and sends discovered resources downstream.
//!
//! ```text
//! ResourceScanner → Filters → RemoveWorkers → (drain)
//! ```
//!
//! Resources are emitted in registry dependency order (`depends_on` targets
//! first), which makes removal ordering strict when `worker_size` is 1 and
//! best-effort otherwise.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::aws;
use crate::registry::Registry;
use crate::resource::{ListerOpts, ScannedResource};
use crate::stage::{SendResult, Stage};
use crate::types::SweepStatistics;
use crate::types::error::{SweepError, is_skip_error};

pub struct ResourceScanner {
    stage: Stage,
    registry: Arc<Registry>,
    account_id: String,
}

impl ResourceScanner {
    pub fn new(stage: Stage, registry: Arc<Registry>, account_id: String) -> Self {
        Self {
            stage,
            registry,
            account_id,
        }
    }

    /// List all selected resource types across all configured regions and
    /// send the discovered resources through the pipeline.
    ///
    /// ## Error policy
    ///
    /// A lister returning a [`SweepError::ListSkip`] is downgraded to a debug
    /// log and a `ListSkip` statistic (the resource type has nothing to do in
    /// that region). Any other lister error aborts the scan.
    pub async fn scan(&self) -> Result<()> {
        debug!("resource scan has started.");

        let ordered = self.registry.iter_ordered()?;

        for region in self.stage.config.regions.clone() {
            if self.stage.cancellation_token.is_cancelled() {
                info!("scan cancelled.");
                return Ok(());
            }

            let sdk_config =
                aws::load_sdk_config(self.stage.config.client_config.as_ref(), &region).await;
            let opts = ListerOpts {
                sdk_config,
                region: region.clone(),
                account_id: self.account_id.clone(),
                settings: self.stage.config.settings.clone(),
            };

            for registration in &ordered {
                if self.stage.cancellation_token.is_cancelled() {
                    info!("scan cancelled.");
                    return Ok(());
                }
                if !self
                    .stage
                    .config
                    .is_type_selected(registration.name, registration.deprecated_aliases)
                {
                    continue;
                }
                if !self
                    .stage
                    .config
                    .scope_active_in(registration.scope, &region)
                {
                    continue;
                }

                debug!(
                    resource_type = registration.name,
                    region = region,
                    "listing resource type."
                );

                let resources = match registration.lister.list(&opts).await {
                    Ok(resources) => resources,
                    Err(e) if is_skip_error(&e) => {
                        let reason = match e.downcast_ref::<SweepError>() {
                            Some(SweepError::ListSkip { reason, .. }) => reason.clone(),
                            _ => e.to_string(),
                        };
                        debug!(
                            resource_type = registration.name,
                            region = region,
                            reason = reason,
                            "resource type skipped in this region."
                        );
                        self.stage
                            .send_stats(SweepStatistics::ListSkip {
                                resource_type: registration.name,
                                region: region.clone(),
                                reason,
                            })
                            .await;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                debug!(
                    resource_type = registration.name,
                    region = region,
                    count = resources.len(),
                    "resource type listed."
                );

                for resource in resources {
                    if self.stage.cancellation_token.is_cancelled() {
                        return Ok(());
                    }
                    let scanned = ScannedResource {
                        resource_type: registration.name,
                        region: region.clone(),
                        resource,
                    };
                    if self.stage.send(scanned).await? == SendResult::Closed {
                        return Ok(());
                    }
                }
            }
        }

        debug!("resource scan has been completed.");
        Ok(())
    }
}
