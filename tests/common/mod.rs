//! Shared E2E test infrastructure for awsweep.
//!
//! Provides `TestHelper` for running sweep pipelines against real AWS.
//! All helpers use the `awsweep-e2e-test` AWS profile; the target region can
//! be overridden with `AWSWEEP_E2E_REGION`. E2E tests are compiled only with
//! `RUSTFLAGS="--cfg e2e_test"` and always run in dry-run mode unless a test
//! explicitly opts out.

#![allow(dead_code)]

use awsweep::config::args::parse_from_args;
use awsweep::config::Config;
use awsweep::{SweepPipeline, SweepStats, create_pipeline_cancellation_token};

/// AWS profile used for all E2E tests.
const AWS_PROFILE: &str = "awsweep-e2e-test";

const DEFAULT_REGION: &str = "us-east-1";

/// Result of running a sweep pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    pub stats: SweepStats,
    pub has_error: bool,
    pub has_warning: bool,
    pub errors: Vec<String>,
}

pub struct TestHelper {
    region: String,
}

impl TestHelper {
    pub fn new() -> Self {
        Self {
            region: std::env::var("AWSWEEP_E2E_REGION")
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// A dry-run config against the e2e profile, built through the CLI
    /// argument path so the e2e suite also exercises arg conversion.
    pub fn dry_run_config(&self, extra_args: &[&str]) -> Config {
        let mut args = vec![
            "awsweep",
            "--region",
            self.region.as_str(),
            "--profile",
            AWS_PROFILE,
            "--dry-run",
            "--force",
            "-qq",
        ];
        args.extend_from_slice(extra_args);

        Config::try_from(parse_from_args(args).unwrap()).unwrap()
    }

    /// Run a pipeline to completion and collect the outcome.
    pub async fn run_pipeline(&self, config: Config) -> PipelineResult {
        let cancellation_token = create_pipeline_cancellation_token();
        let mut pipeline = SweepPipeline::new(config, cancellation_token)
            .await
            .expect("failed to build pipeline");
        pipeline.close_stats_sender();
        pipeline.run().await;

        let has_error = pipeline.has_error();
        let has_warning = pipeline.has_warning();
        let stats = pipeline.stats();
        let errors = pipeline
            .get_errors_and_consume()
            .unwrap_or_default()
            .iter()
            .map(|e| format!("{e:#}"))
            .collect();

        PipelineResult {
            stats,
            has_error,
            has_warning,
            errors,
        }
    }
}
