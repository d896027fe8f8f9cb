use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::resource::ScannedResource;
use crate::types::token::PipelineCancellationToken;
use crate::types::{SweepStatistics, SweepStatsReport};

/// Result of sending a resource to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// Channels connect stages: each stage reads from `receiver` and writes to
/// `sender`. The ResourceScanner stage has no `receiver` (it is the pipeline
/// entry point); the terminal drain has no `sender`. Statistics flow through
/// a dedicated channel consumed by the CLI indicator.
///
/// Each stage takes ownership of a `Stage`, consuming it during pipeline
/// construction.
pub struct Stage {
    pub config: Config,
    pub receiver: Option<Receiver<ScannedResource>>,
    pub sender: Option<Sender<ScannedResource>>,
    pub stats_sender: Sender<SweepStatistics>,
    pub stats_report: Arc<SweepStatsReport>,
    pub cancellation_token: PipelineCancellationToken,
    pub has_warning: Arc<AtomicBool>,
}

impl Stage {
    pub fn new(
        config: Config,
        receiver: Option<Receiver<ScannedResource>>,
        sender: Option<Sender<ScannedResource>>,
        stats_sender: Sender<SweepStatistics>,
        stats_report: Arc<SweepStatsReport>,
        cancellation_token: PipelineCancellationToken,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            receiver,
            sender,
            stats_sender,
            stats_report,
            cancellation_token,
            has_warning,
        }
    }

    /// Send a resource to the next stage via the sender channel.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// (e.g. due to cancellation), allowing the caller to exit gracefully.
    pub async fn send(&self, resource: ScannedResource) -> Result<SendResult> {
        let result = self
            .sender
            .as_ref()
            .unwrap()
            .send(resource)
            .await
            .context("async_channel::Sender::send() failed.");

        if let Err(e) = result {
            return if !self.is_channel_closed() {
                Err(anyhow!(e))
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Check if the sender channel has been closed by the receiver.
    pub fn is_channel_closed(&self) -> bool {
        self.sender.as_ref().unwrap().is_closed()
    }

    /// Send a statistics event through the stats channel.
    pub async fn send_stats(&self, stats: SweepStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    /// Set the warning flag to indicate a non-fatal issue occurred.
    pub fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_dummy_tracing_subscriber, make_scanned_resource, make_test_config};
    use crate::types::token::create_pipeline_cancellation_token;

    fn make_stage(
        receiver: Option<Receiver<ScannedResource>>,
        sender: Option<Sender<ScannedResource>>,
        stats_sender: Sender<SweepStatistics>,
    ) -> Stage {
        Stage::new(
            make_test_config(),
            receiver,
            sender,
            stats_sender,
            Arc::new(SweepStatsReport::default()),
            create_pipeline_cancellation_token(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn send_forwards_to_next_stage() {
        init_dummy_tracing_subscriber();

        let (sender, receiver) = async_channel::bounded(10);
        let (stats_sender, _stats_receiver) = async_channel::unbounded();
        let stage = make_stage(None, Some(sender), stats_sender);

        let result = stage
            .send(make_scanned_resource("MockResource", "res-1"))
            .await
            .unwrap();
        assert_eq!(result, SendResult::Success);
        assert_eq!(receiver.recv().await.unwrap().id(), "res-1");
    }

    #[tokio::test]
    async fn send_to_closed_channel_reports_closed() {
        init_dummy_tracing_subscriber();

        let (sender, receiver) = async_channel::bounded(10);
        let (stats_sender, _stats_receiver) = async_channel::unbounded();
        let stage = make_stage(None, Some(sender), stats_sender);

        receiver.close();
        let result = stage
            .send(make_scanned_resource("MockResource", "res-1"))
            .await
            .unwrap();
        assert_eq!(result, SendResult::Closed);
    }

    #[tokio::test]
    async fn stats_and_warning() {
        init_dummy_tracing_subscriber();

        let (sender, _receiver) = async_channel::bounded(10);
        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let stage = make_stage(None, Some(sender), stats_sender);

        stage
            .send_stats(SweepStatistics::RemoveComplete {
                resource_type: "MockResource",
                id: "res-1".to_string(),
            })
            .await;
        assert!(matches!(
            stats_receiver.recv().await.unwrap(),
            SweepStatistics::RemoveComplete { .. }
        ));

        assert!(!stage.has_warning.load(Ordering::SeqCst));
        stage.set_warning();
        assert!(stage.has_warning.load(Ordering::SeqCst));
    }
}
