//! Shared test utilities for the awsweep library crate.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::config::Config;
use crate::resource::{ListerOpts, Resource, ResourceLister, ScannedResource};
use crate::types::properties::Properties;

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a default [`Config`] suitable for most unit tests.
///
/// Single region, one worker, STS resolution disabled.
pub(crate) fn make_test_config() -> Config {
    Config {
        regions: vec!["us-east-1".to_string()],
        account_id: Some("123456789012".to_string()),
        skip_account_check: true,
        worker_size: 1,
        force: true,
        ..Config::default()
    }
}

/// A resource whose behavior is fully scripted from the outside.
pub(crate) struct MockResource {
    id: String,
    filter_reason: Option<String>,
    fail_remove: bool,
    pub remove_calls: Arc<AtomicU32>,
    tags: Vec<(String, String)>,
}

impl MockResource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            filter_reason: None,
            fail_remove: false,
            remove_calls: Arc::new(AtomicU32::new(0)),
            tags: Vec::new(),
        }
    }

    pub fn with_filter_reason(mut self, reason: &str) -> Self {
        self.filter_reason = Some(reason.to_string());
        self
    }

    pub fn with_failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }
}

impl fmt::Display for MockResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[async_trait]
impl Resource for MockResource {
    async fn remove(&self) -> Result<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove {
            return Err(anyhow!("mock removal failure for {}", self.id));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.id);
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        self.filter_reason.clone()
    }
}

/// A lister that returns pre-built resources and counts invocations.
pub(crate) struct MockLister {
    resources: Vec<Arc<dyn Resource>>,
    error: Option<String>,
    pub list_calls: Arc<AtomicU32>,
}

impl MockLister {
    pub fn empty() -> Self {
        Self::with_resources(Vec::new())
    }

    pub fn with_resources(resources: Vec<Arc<dyn Resource>>) -> Self {
        Self {
            resources,
            error: None,
            list_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            resources: Vec::new(),
            error: Some(message.to_string()),
            list_calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl ResourceLister for MockLister {
    async fn list(&self, _opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(anyhow!("{message}"));
        }
        Ok(self.resources.clone())
    }
}

/// Wrap a mock resource for channel-based stage tests.
pub(crate) fn make_scanned_resource(resource_type: &'static str, id: &str) -> ScannedResource {
    ScannedResource {
        resource_type,
        region: "us-east-1".to_string(),
        resource: Arc::new(MockResource::new(id)),
    }
}

/// Lister options for adapter tests. The SDK config is built offline and is
/// never used when a mock client is injected.
pub(crate) fn make_test_lister_opts() -> ListerOpts {
    ListerOpts {
        sdk_config: aws_config::SdkConfig::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build(),
        region: "us-east-1".to_string(),
        account_id: "123456789012".to_string(),
        settings: crate::config::Settings::default(),
    }
}

/// A raw HTTP response for constructing mock SDK service errors.
pub(crate) fn sdk_http_response()
-> aws_smithy_runtime_api::http::Response<aws_smithy_types::body::SdkBody> {
    aws_smithy_runtime_api::http::Response::new(
        aws_smithy_runtime_api::http::StatusCode::try_from(400).unwrap(),
        aws_smithy_types::body::SdkBody::empty(),
    )
}
