//! Remove workers for the sweep pipeline.
//!
//! Each worker reads filtered resources from the input channel and calls
//! [`Resource::remove`](crate::resource::Resource::remove) on them, honoring
//! dry-run mode and the max-delete threshold. Per-resource failures are
//! warnings by default (`warn_as_error` promotes them); the pass continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::resource::ScannedResource;
use crate::stage::{SendResult, Stage};
use crate::types::SweepStatistics;

pub struct RemoveWorker {
    worker_index: u16,
    base: Stage,
    /// Total removals attempted across all workers, for max-delete enforcement.
    remove_counter: Arc<AtomicU64>,
}

impl RemoveWorker {
    pub fn new(base: Stage, worker_index: u16, remove_counter: Arc<AtomicU64>) -> Self {
        Self {
            worker_index,
            base,
            remove_counter,
        }
    }

    /// Main entry point: read resources from the channel and remove them.
    pub async fn remove(&self) -> Result<()> {
        debug!(worker_index = self.worker_index, "remove worker started.");
        self.receive_and_remove().await
    }

    async fn receive_and_remove(&self) -> Result<()> {
        loop {
            tokio::task::yield_now().await;
            if self.base.cancellation_token.is_cancelled() {
                debug!(
                    worker_index = self.worker_index,
                    "remove worker has been cancelled."
                );
                return Ok(());
            }

            match self.base.receiver.as_ref().unwrap().recv().await {
                Ok(scanned) => {
                    if !self.check_max_delete(&scanned).await {
                        return Ok(());
                    }
                    self.remove_one(scanned).await?;
                }
                Err(_) => {
                    debug!(
                        worker_index = self.worker_index,
                        "remove worker has been completed."
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Returns false when the max-delete threshold has been crossed; the
    /// pipeline is cancelled so the remaining stages drain and exit.
    async fn check_max_delete(&self, scanned: &ScannedResource) -> bool {
        let Some(max_delete) = self.base.config.max_delete else {
            return true;
        };

        let attempted = self.remove_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if attempted > max_delete {
            warn!(
                max_delete = max_delete,
                resource_type = scanned.resource_type,
                id = %scanned.id(),
                "max-delete threshold reached, cancelling the sweep."
            );
            self.base.cancellation_token.cancel();
            return false;
        }
        true
    }

    async fn remove_one(&self, scanned: ScannedResource) -> Result<()> {
        let id = scanned.id();

        if self.base.config.dry_run {
            info!(
                resource_type = scanned.resource_type,
                region = scanned.region,
                id = %id,
                "would remove resource. (dry-run)"
            );
            self.base.stats_report.add_removed();
            self.base
                .send_stats(SweepStatistics::RemoveComplete {
                    resource_type: scanned.resource_type,
                    id,
                })
                .await;
            return self.forward(scanned).await;
        }

        match scanned.resource.remove().await {
            Ok(()) => {
                info!(
                    resource_type = scanned.resource_type,
                    region = scanned.region,
                    id = %id,
                    "resource removed."
                );
                self.base.stats_report.add_removed();
                self.base
                    .send_stats(SweepStatistics::RemoveComplete {
                        resource_type: scanned.resource_type,
                        id,
                    })
                    .await;
            }
            Err(e) => {
                warn!(
                    resource_type = scanned.resource_type,
                    region = scanned.region,
                    id = %id,
                    error = %e,
                    "failed to remove resource."
                );
                self.base.stats_report.add_failed();
                self.base
                    .send_stats(SweepStatistics::RemoveError {
                        resource_type: scanned.resource_type,
                        id,
                    })
                    .await;

                if self.base.config.warn_as_error {
                    return Err(e);
                }
                self.base.set_warning();
            }
        }

        self.forward(scanned).await
    }

    /// Forward the processed resource downstream (to the terminal drain).
    async fn forward(&self, scanned: ScannedResource) -> Result<()> {
        if self.base.sender.is_some() {
            if self.base.send(scanned).await? == SendResult::Closed {
                debug!(
                    worker_index = self.worker_index,
                    "downstream channel closed."
                );
            }
        }
        Ok(())
    }
}
