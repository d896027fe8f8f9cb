/*!
# Overview
awsweep is an AWS account resource sweeper.
Given AWS credentials, it enumerates resources across many AWS services
through per-type adapters and deletes them, subject to filters and safety
guards (dry-run, confirmation, account blocklist, max-delete threshold).

## Features
- **Per-type adapters**: each supported resource type is a `Lister` that
  enumerates live resources and a `Resource` wrapper exposing removal,
  a properties bag, and a display identifier
- **Explicit registry**: adapters are registered by an explicit startup
  routine with scope, removal-ordering dependencies, and settings metadata
- **Flexible filtering**: resource-type selection, regex and tag filters,
  and per-resource self-exclusion of AWS-owned defaults
- **Safety first**: dry-run mode, account-id confirmation prompt, account
  blocklist, force flag, max-delete threshold
- **Library-first**: the awsweep CLI is a thin wrapper over this crate

Example usage
=============

```toml
[dependencies]
awsweep = "0.4"
tokio = { version = "1", features = ["full"] }
```

```no_run
use awsweep::config::Config;
use awsweep::pipeline::SweepPipeline;
use awsweep::types::token::create_pipeline_cancellation_token;

#[tokio::main]
async fn main() {
    let mut config = Config::for_regions(vec!["us-east-1".to_string()]);
    config.dry_run = true;

    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = SweepPipeline::new(config, cancellation_token)
        .await
        .unwrap();
    pipeline.close_stats_sender();
    pipeline.run().await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod aws;
pub mod config;
pub mod filters;
pub mod pipeline;
pub mod registry;
pub mod remover;
pub mod resource;
pub mod resources;
pub mod safety;
pub mod scanner;
pub mod stage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::CLIArgs;
pub use pipeline::{SweepPipeline, SweepStats};
pub use registry::{Registration, Registry};
pub use resource::{ListerOpts, Resource, ResourceLister};
pub use types::error::{exit_code_from_error, is_cancelled_error, is_skip_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
