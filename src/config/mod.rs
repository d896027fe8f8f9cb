pub mod args;

use std::collections::{HashMap, HashSet};

use fancy_regex::Regex;

use crate::types::{AwsCredentials, Scope};

/// Main configuration for the awsweep sweep pipeline.
///
/// Holds everything needed to configure and run a [`SweepPipeline`](crate::SweepPipeline):
/// target regions, expected account, credentials, worker pool size, resource
/// type selection, filter rules, safety flags (dry-run, force, blocklist,
/// max-delete), and per-resource-type settings.
///
/// # Quick Start
///
/// Use [`Config::for_regions`] for a minimal configuration with sensible defaults:
///
/// ```
/// use awsweep::Config;
///
/// let config = Config::for_regions(vec!["us-east-1".to_string()]);
/// assert_eq!(config.worker_size, 8);
/// assert!(config.force); // no interactive prompts in library usage
/// ```
///
/// Then customize fields as needed:
///
/// ```
/// use awsweep::Config;
///
/// let mut config = Config::for_regions(vec!["us-east-1".to_string()]);
/// config.dry_run = true;
/// config.max_delete = Some(500);
/// config.resource_types = vec!["KMSAlias".to_string(), "SNSTopic".to_string()];
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Regions to sweep, in order. Account-scoped resource types are listed
    /// only for the first region.
    pub regions: Vec<String>,
    /// Expected account ID. When set, the STS-resolved identity must match.
    pub account_id: Option<String>,
    /// Account IDs that must never be swept.
    pub blocklist: Vec<String>,
    /// Skip STS identity resolution and trust `account_id` as-is.
    /// Intended for tests and offline runs; requires `account_id`.
    pub skip_account_check: bool,
    pub client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub worker_size: u16,
    pub warn_as_error: bool,
    pub dry_run: bool,
    pub force: bool,
    pub max_delete: Option<u64>,
    /// Resource type names (or deprecated aliases) to sweep. Empty = all.
    pub resource_types: Vec<String>,
    /// Resource type names (or deprecated aliases) to exclude.
    pub exclude_resource_types: Vec<String>,
    pub filter_config: FilterConfig,
    pub settings: Settings,
    /// Bound of the scanner → filter channel.
    pub scan_queue_size: u32,
    pub show_no_progress: bool,
    pub log_sweep_summary: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with sensible defaults for the given regions.
    ///
    /// This is the recommended way to construct a `Config` for library usage.
    /// The `force` flag is set to `true` to skip interactive confirmation
    /// prompts, which is appropriate for programmatic use.
    pub fn for_regions(regions: Vec<String>) -> Self {
        Config {
            regions,
            force: true,
            ..Config::default()
        }
    }

    /// Check whether a resource type is selected for this sweep.
    ///
    /// `aliases` are the registration's deprecated alias names; they keep
    /// old filter configurations working after a type is renamed.
    pub fn is_type_selected(&self, name: &str, aliases: &[&str]) -> bool {
        let matches =
            |candidate: &String| candidate.as_str() == name || aliases.contains(&candidate.as_str());

        if self.exclude_resource_types.iter().any(matches) {
            return false;
        }
        if self.resource_types.is_empty() {
            return true;
        }
        self.resource_types.iter().any(matches)
    }

    /// The region used for account-scoped resource types.
    pub fn account_region(&self) -> Option<&str> {
        self.regions.first().map(String::as_str)
    }

    /// Whether a resource of `scope` should be listed while scanning `region`.
    pub fn scope_active_in(&self, scope: Scope, region: &str) -> bool {
        match scope {
            Scope::Region => true,
            Scope::Account => self.account_region() == Some(region),
        }
    }
}

impl Default for Config {
    /// Create a `Config` with sensible defaults.
    ///
    /// `regions` defaults to empty — set it before running a pipeline.
    fn default() -> Self {
        Config {
            regions: Vec::new(),
            account_id: None,
            blocklist: Vec::new(),
            skip_account_check: false,
            client_config: None,
            tracing_config: None,
            worker_size: 8,
            warn_as_error: false,
            dry_run: false,
            force: false,
            max_delete: None,
            resource_types: Vec::new(),
            exclude_resource_types: Vec::new(),
            filter_config: FilterConfig::default(),
            settings: Settings::default(),
            scan_queue_size: 10_000,
            show_no_progress: false,
            log_sweep_summary: true,
            auto_complete_shell: None,
        }
    }
}

/// AWS client configuration: credential source, endpoint, retries, timeouts.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credential: AwsCredentials,
    pub endpoint_url: Option<String>,
    pub retry_config: RetryConfig,
    pub timeout_config: CliTimeoutConfig,
}

/// Retry configuration for AWS SDK operations (exponential backoff).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct CliTimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration supporting verbosity levels, JSON format,
/// color control, and AWS SDK tracing.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

/// Filter configuration for resource selection.
///
/// Regex filters match against the resource's display identifier; tag filters
/// match against the canonical `key1=value1&key2=value2` tag string derived
/// from the properties bag (keys sorted alphabetically).
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub include_regex: Option<Regex>,
    pub exclude_regex: Option<Regex>,
    pub include_tag_regex: Option<Regex>,
    pub exclude_tag_regex: Option<Regex>,
}

/// Named boolean toggles consulted by resource adapters at removal time,
/// keyed by resource type name.
///
/// Listers resolve the toggles relevant to their type at construction time
/// and bake the booleans into each resource, so a `Settings` value is only
/// read while scanning.
///
/// ```
/// use awsweep::config::Settings;
///
/// let mut settings = Settings::default();
/// settings.enable("RDSInstance", "DisableDeletionProtection");
/// assert!(settings.is_enabled("RDSInstance", "DisableDeletionProtection"));
/// assert!(!settings.is_enabled("RDSInstance", "Other"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Settings {
    toggles: HashMap<String, HashSet<String>>,
}

impl Settings {
    pub fn enable(&mut self, resource_type: &str, key: &str) {
        self.toggles
            .entry(resource_type.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub fn is_enabled(&self, resource_type: &str, key: &str) -> bool {
        self.toggles
            .get(resource_type)
            .is_some_and(|keys| keys.contains(key))
    }
}
