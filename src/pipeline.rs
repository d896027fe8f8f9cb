//! The sweep pipeline: wires the scanner, filter chain, and remove workers
//! together over bounded channels and drives them to completion.
//!
//! ```text
//! ResourceScanner → ExclusionFilter → [IncludeRegexFilter] → [ExcludeRegexFilter]
//!                 → [TagRegexFilter] → RemoveWorker × N → (drain)
//! ```
//!
//! Bracketed stages are only spawned when the corresponding rule is
//! configured. Stage errors are collected, not propagated mid-run: the
//! caller inspects `has_error()` / `get_errors_and_consume()` afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::aws;
use crate::config::Config;
use crate::filters::{
    ExcludeRegexFilter, ExclusionFilter, IncludeRegexFilter, ResourceFilter, TagRegexFilter,
};
use crate::registry::Registry;
use crate::remover::RemoveWorker;
use crate::resource::ScannedResource;
use crate::safety::{self, SafetyChecker};
use crate::scanner::ResourceScanner;
use crate::stage::Stage;
use crate::types::error::SweepError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{SweepStatistics, SweepStatsReport};

/// Snapshot of the sweep counters after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct SweepPipeline {
    config: Config,
    registry: Arc<Registry>,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SweepStatistics>,
    stats_receiver: Receiver<SweepStatistics>,
    stats_report: Arc<SweepStatsReport>,
    has_warning: Arc<AtomicBool>,
    errors: Option<Vec<anyhow::Error>>,
}

impl SweepPipeline {
    /// Create a pipeline over the built-in adapter registry.
    pub async fn new(
        config: Config,
        cancellation_token: PipelineCancellationToken,
    ) -> Result<Self> {
        let registry = Registry::builtin()?;
        Ok(Self::with_registry(
            config,
            cancellation_token,
            Arc::new(registry),
        ))
    }

    /// Create a pipeline over a caller-supplied registry.
    ///
    /// Useful for sweeping a subset of adapters or injecting mock listers in
    /// tests.
    pub fn with_registry(
        config: Config,
        cancellation_token: PipelineCancellationToken,
        registry: Arc<Registry>,
    ) -> Self {
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        Self {
            config,
            registry,
            cancellation_token,
            stats_sender,
            stats_receiver,
            stats_report: Arc::new(SweepStatsReport::default()),
            has_warning: Arc::new(AtomicBool::new(false)),
            errors: Some(Vec::new()),
        }
    }

    /// Statistics channel receiver, for progress indicators.
    pub fn get_stats_receiver(&self) -> Receiver<SweepStatistics> {
        self.stats_receiver.clone()
    }

    /// Close the stats channel. Call this when no consumer will drain the
    /// receiver, otherwise events accumulate for the lifetime of the run.
    pub fn close_stats_sender(&self) {
        self.stats_sender.close();
    }

    pub fn has_error(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Take the collected errors. Returns `None` on second call.
    pub fn get_errors_and_consume(&mut self) -> Option<Vec<anyhow::Error>> {
        self.errors.take()
    }

    pub fn stats(&self) -> SweepStats {
        SweepStats {
            removed: self.stats_report.removed.load(Ordering::SeqCst),
            skipped: self.stats_report.skipped.load(Ordering::SeqCst),
            failed: self.stats_report.failed.load(Ordering::SeqCst),
        }
    }

    /// Run the sweep to completion.
    ///
    /// Errors (including user cancellation of the confirmation prompt) are
    /// collected rather than returned; inspect `has_error()` afterwards.
    pub async fn run(&mut self) {
        let account_id = match self.prepare().await {
            Ok(account_id) => account_id,
            Err(e) => {
                self.push_error(e);
                return;
            }
        };

        self.run_stages(account_id).await;
    }

    /// Resolve the target account and apply the safety guards.
    async fn prepare(&self) -> Result<String> {
        if self.config.regions.is_empty() {
            return Err(anyhow!(SweepError::InvalidConfig(
                "at least one region is required.".to_string()
            )));
        }

        let account_id = if self.config.skip_account_check {
            self.config.account_id.clone().ok_or_else(|| {
                anyhow!(SweepError::InvalidConfig(
                    "skip_account_check requires account_id.".to_string()
                ))
            })?
        } else {
            let region = &self.config.regions[0];
            let sdk_config =
                aws::load_sdk_config(self.config.client_config.as_ref(), region).await;
            aws::resolve_account_id(&sdk_config).await?
        };

        safety::check_account(&account_id, &self.config)?;
        SafetyChecker::new(&self.config, &account_id).check_before_sweep()?;

        debug!(account_id = account_id, "sweeping account.");
        Ok(account_id)
    }

    async fn run_stages(&mut self, account_id: String) {
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();
        let queue_size = self.config.scan_queue_size as usize;

        // Scanner (entry point, no receiver).
        let (scan_sender, mut upstream) = async_channel::bounded(queue_size);
        let scanner = ResourceScanner::new(
            self.make_stage(None, Some(scan_sender)),
            self.registry.clone(),
            account_id,
        );
        join_set.spawn(async move { scanner.scan().await });

        // Filter chain: exclusion always, the rest when configured.
        {
            let (sender, receiver) = async_channel::bounded(queue_size);
            let filter = ExclusionFilter::new(self.make_stage(Some(upstream), Some(sender)));
            join_set.spawn(async move { filter.filter().await });
            upstream = receiver;
        }
        if self.config.filter_config.include_regex.is_some() {
            let (sender, receiver) = async_channel::bounded(queue_size);
            let filter = IncludeRegexFilter::new(self.make_stage(Some(upstream), Some(sender)));
            join_set.spawn(async move { filter.filter().await });
            upstream = receiver;
        }
        if self.config.filter_config.exclude_regex.is_some() {
            let (sender, receiver) = async_channel::bounded(queue_size);
            let filter = ExcludeRegexFilter::new(self.make_stage(Some(upstream), Some(sender)));
            join_set.spawn(async move { filter.filter().await });
            upstream = receiver;
        }
        if self.config.filter_config.include_tag_regex.is_some()
            || self.config.filter_config.exclude_tag_regex.is_some()
        {
            let (sender, receiver) = async_channel::bounded(queue_size);
            let filter = TagRegexFilter::new(self.make_stage(Some(upstream), Some(sender)));
            join_set.spawn(async move { filter.filter().await });
            upstream = receiver;
        }

        // Remove workers share the upstream receiver; processed resources
        // flow into the drain channel.
        let (done_sender, done_receiver) = async_channel::bounded::<ScannedResource>(queue_size);
        let remove_counter = Arc::new(AtomicU64::new(0));
        for worker_index in 0..self.config.worker_size.max(1) {
            let worker = RemoveWorker::new(
                self.make_stage(Some(upstream.clone()), Some(done_sender.clone())),
                worker_index,
                remove_counter.clone(),
            );
            join_set.spawn(async move { worker.remove().await });
        }
        drop(upstream);
        drop(done_sender);

        // Terminal drain: consume processed resources so workers never block
        // on a full channel.
        join_set.spawn(async move {
            while done_receiver.recv().await.is_ok() {}
            debug!("drain has been completed.");
            Ok(())
        });

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("pipeline stage failed: {:#}", e);
                    self.cancellation_token.cancel();
                    self.push_error(e);
                }
                Err(join_error) => {
                    error!("pipeline stage panicked: {}", join_error);
                    self.cancellation_token.cancel();
                    self.push_error(anyhow!(SweepError::Pipeline(join_error.to_string())));
                }
            }
        }
    }

    fn make_stage(
        &self,
        receiver: Option<Receiver<ScannedResource>>,
        sender: Option<Sender<ScannedResource>>,
    ) -> Stage {
        Stage::new(
            self.config.clone(),
            receiver,
            sender,
            self.stats_sender.clone(),
            self.stats_report.clone(),
            self.cancellation_token.clone(),
            self.has_warning.clone(),
        )
    }

    fn push_error(&mut self, e: anyhow::Error) {
        self.errors.get_or_insert_with(Vec::new).push(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registration;
    use crate::test_utils::{
        MockLister, MockResource, init_dummy_tracing_subscriber, make_test_config,
    };
    use crate::types::Scope;
    use crate::types::error::is_cancelled_error;
    use crate::types::token::create_pipeline_cancellation_token;
    use fancy_regex::Regex;

    fn single_type_registry(lister: MockLister) -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .register(Registration {
                name: "MockResource",
                scope: Scope::Region,
                lister: Arc::new(lister),
                depends_on: &[],
                settings: &[],
                deprecated_aliases: &[],
            })
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn sweeps_listed_resources() {
        init_dummy_tracing_subscriber();

        let resource_a = MockResource::new("res-a");
        let remove_calls_a = resource_a.remove_calls.clone();
        let lister = MockLister::with_resources(vec![
            Arc::new(resource_a),
            Arc::new(MockResource::new("res-b")),
        ]);

        let mut pipeline = SweepPipeline::with_registry(
            make_test_config(),
            create_pipeline_cancellation_token(),
            single_type_registry(lister),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(!pipeline.has_error());
        assert!(!pipeline.has_warning());
        assert_eq!(
            pipeline.stats(),
            SweepStats {
                removed: 2,
                skipped: 0,
                failed: 0
            }
        );
        assert_eq!(remove_calls_a.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn self_excluded_resources_are_skipped() {
        init_dummy_tracing_subscriber();

        let excluded = MockResource::new("default").with_filter_reason("AWS-owned default");
        let excluded_calls = excluded.remove_calls.clone();
        let lister = MockLister::with_resources(vec![
            Arc::new(excluded),
            Arc::new(MockResource::new("mine")),
        ]);

        let mut pipeline = SweepPipeline::with_registry(
            make_test_config(),
            create_pipeline_cancellation_token(),
            single_type_registry(lister),
        );
        let stats_receiver = pipeline.get_stats_receiver();
        pipeline.run().await;

        assert_eq!(pipeline.stats().removed, 1);
        assert_eq!(pipeline.stats().skipped, 1);
        assert_eq!(excluded_calls.load(Ordering::SeqCst), 0);

        let mut saw_skip = false;
        while let Ok(stat) = stats_receiver.try_recv() {
            if matches!(stat, SweepStatistics::RemoveSkip { ref id, .. } if id == "default") {
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }

    #[tokio::test]
    async fn regex_filters_are_applied() {
        init_dummy_tracing_subscriber();

        let keep = MockResource::new("prod-db");
        let keep_calls = keep.remove_calls.clone();
        let drop_resource = MockResource::new("staging-db");
        let drop_calls = drop_resource.remove_calls.clone();
        let lister =
            MockLister::with_resources(vec![Arc::new(keep), Arc::new(drop_resource)]);

        let mut config = make_test_config();
        config.filter_config.include_regex = Some(Regex::new(r"^prod-").unwrap());

        let mut pipeline = SweepPipeline::with_registry(
            config,
            create_pipeline_cancellation_token(),
            single_type_registry(lister),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert_eq!(keep_calls.load(Ordering::SeqCst), 1);
        assert_eq!(drop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dry_run_reports_but_does_not_remove() {
        init_dummy_tracing_subscriber();

        let resource = MockResource::new("res-a");
        let remove_calls = resource.remove_calls.clone();
        let lister = MockLister::with_resources(vec![Arc::new(resource)]);

        let mut config = make_test_config();
        config.dry_run = true;

        let mut pipeline = SweepPipeline::with_registry(
            config,
            create_pipeline_cancellation_token(),
            single_type_registry(lister),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(!pipeline.has_error());
        assert_eq!(pipeline.stats().removed, 1);
        assert_eq!(remove_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_removal_sets_warning_not_error() {
        init_dummy_tracing_subscriber();

        let lister = MockLister::with_resources(vec![Arc::new(
            MockResource::new("res-a").with_failing_remove(),
        )]);

        let mut pipeline = SweepPipeline::with_registry(
            make_test_config(),
            create_pipeline_cancellation_token(),
            single_type_registry(lister),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(!pipeline.has_error());
        assert!(pipeline.has_warning());
        assert_eq!(pipeline.stats().failed, 1);
    }

    #[tokio::test]
    async fn hard_lister_error_is_collected() {
        init_dummy_tracing_subscriber();

        let mut pipeline = SweepPipeline::with_registry(
            make_test_config(),
            create_pipeline_cancellation_token(),
            single_type_registry(MockLister::failing("AccessDenied")),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(pipeline.has_error());
        let errors = pipeline.get_errors_and_consume().unwrap();
        assert!(errors[0].to_string().contains("AccessDenied"));
        assert!(pipeline.get_errors_and_consume().is_none());
    }

    #[tokio::test]
    async fn blocklisted_account_refuses_to_run() {
        init_dummy_tracing_subscriber();

        let lister = MockLister::empty();
        let list_calls = lister.list_calls.clone();

        let mut config = make_test_config();
        config.blocklist = vec!["123456789012".to_string()];

        let mut pipeline = SweepPipeline::with_registry(
            config,
            create_pipeline_cancellation_token(),
            single_type_registry(lister),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(pipeline.has_error());
        let errors = pipeline.get_errors_and_consume().unwrap();
        assert!(errors[0].to_string().contains("blocklisted"));
        assert_eq!(list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_region_is_invalid_config() {
        init_dummy_tracing_subscriber();

        let mut config = make_test_config();
        config.regions.clear();

        let mut pipeline = SweepPipeline::with_registry(
            config,
            create_pipeline_cancellation_token(),
            single_type_registry(MockLister::empty()),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(pipeline.has_error());
    }

    #[tokio::test]
    async fn cancelled_before_run_produces_no_removals() {
        init_dummy_tracing_subscriber();

        let resource = MockResource::new("res-a");
        let remove_calls = resource.remove_calls.clone();
        let lister = MockLister::with_resources(vec![Arc::new(resource)]);

        let cancellation_token = create_pipeline_cancellation_token();
        cancellation_token.cancel();

        let mut pipeline = SweepPipeline::with_registry(
            make_test_config(),
            cancellation_token,
            single_type_registry(lister),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(!pipeline.has_error());
        assert_eq!(remove_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skip_account_check_requires_account_id() {
        init_dummy_tracing_subscriber();

        let mut config = make_test_config();
        config.account_id = None; // skip_account_check stays true

        let mut pipeline = SweepPipeline::with_registry(
            config,
            create_pipeline_cancellation_token(),
            single_type_registry(MockLister::empty()),
        );
        pipeline.close_stats_sender();
        pipeline.run().await;

        assert!(pipeline.has_error());
        let errors = pipeline.get_errors_and_consume().unwrap();
        assert!(!is_cancelled_error(&errors[0]));
        assert!(errors[0].to_string().contains("requires account_id"));
    }
}
