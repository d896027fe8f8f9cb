use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use fancy_regex::Regex;
use std::ffi::OsString;

use crate::config::{
    CliTimeoutConfig, ClientConfig, Config, FilterConfig, RetryConfig, Settings, TracingConfig,
};
use crate::types::{AccessKeys, AwsCredentials};


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_WORKER_SIZE: u16 = 8;
const DEFAULT_SCAN_QUEUE_SIZE: u32 = 10_000;
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_FORCE: bool = false;
const DEFAULT_WARN_AS_ERROR: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_NO_REGION: &str = "At least one --region is required.";
const ERROR_MESSAGE_INVALID_REGEX: &str = "Invalid regular expression pattern";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_SCAN_QUEUE_SIZE_ZERO: &str = "Scan queue size must be at least 1.";
const ERROR_MESSAGE_INVALID_ACCOUNT_ID: &str = "Account IDs must be exactly 12 digits.";
const ERROR_MESSAGE_INCOMPLETE_ACCESS_KEYS: &str =
    "Both --access-key and --secret-access-key are required for static credentials.";

// ---------------------------------------------------------------------------
// Value parser helpers
// ---------------------------------------------------------------------------

fn check_account_id(s: &str) -> Result<String, String> {
    if s.len() == 12 && s.bytes().all(|b| b.is_ascii_digit()) {
        Ok(s.to_string())
    } else {
        Err(ERROR_MESSAGE_INVALID_ACCOUNT_ID.to_string())
    }
}

/// Clap value_parser for `--setting TYPE:TOGGLE` entries.
fn check_setting(s: &str) -> Result<String, String> {
    match s.split_once(':') {
        Some((resource_type, toggle)) if !resource_type.is_empty() && !toggle.is_empty() => {
            Ok(s.to_string())
        }
        _ => Err(format!(
            "Settings must have the form RESOURCE_TYPE:TOGGLE (e.g. RDSInstance:DisableDeletionProtection), got '{s}'."
        )),
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// awsweep - AWS account resource sweeper.
///
/// Enumerate resources across AWS services and delete them, subject to
/// filters and safety guards.
///
/// Example:
///   awsweep --region us-east-1 --dry-run
///   awsweep --region us-east-1 --region eu-west-1 --account-id 123456789012 --force
///   awsweep --region us-east-1 --resource-types KMSAlias,SNSTopic -vv
#[derive(Parser, Clone, Debug)]
#[command(name = "awsweep", version, about, long_about = None)]
pub struct CLIArgs {
    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Region to sweep. Repeat for multiple regions; account-scoped resource
    /// types are listed in the first region only.
    #[arg(
        short = 'r',
        long = "region",
        env = "AWSWEEP_REGIONS",
        value_delimiter = ',',
        required_unless_present = "auto_complete_shell",
        help_heading = "General"
    )]
    pub regions: Vec<String>,

    /// Simulation mode. Lists and filters resources but does not delete.
    #[arg(short = 'd', long, env, default_value_t = DEFAULT_DRY_RUN, help_heading = "General")]
    pub dry_run: bool,

    /// Don't show the progress indicator.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    // -----------------------------------------------------------------------
    // Safety options
    // -----------------------------------------------------------------------
    /// Expected account ID. The sweep refuses to run when the credentials
    /// resolve to a different account.
    #[arg(long, env, value_parser = check_account_id, help_heading = "Safety")]
    pub account_id: Option<String>,

    /// Account IDs that must never be swept.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        value_parser = check_account_id,
        help_heading = "Safety"
    )]
    pub blocklist: Vec<String>,

    /// Skip confirmation prompt before sweeping.
    #[arg(short = 'f', long, env, default_value_t = DEFAULT_FORCE, help_heading = "Safety")]
    pub force: bool,

    /// Cancel the sweep when the removal count exceeds this limit.
    #[arg(long, env, help_heading = "Safety")]
    pub max_delete: Option<u64>,

    // -----------------------------------------------------------------------
    // Selection options
    // -----------------------------------------------------------------------
    /// Sweep only these resource types (names or deprecated aliases).
    #[arg(long, env, value_delimiter = ',', help_heading = "Selection")]
    pub resource_types: Vec<String>,

    /// Never sweep these resource types.
    #[arg(long, env, value_delimiter = ',', help_heading = "Selection")]
    pub exclude_resource_types: Vec<String>,

    /// Enable a per-resource-type toggle, e.g.
    /// RDSInstance:DisableDeletionProtection. Repeatable.
    #[arg(long = "setting", env = "AWSWEEP_SETTINGS", value_parser = check_setting, help_heading = "Selection")]
    pub settings: Vec<String>,

    // -----------------------------------------------------------------------
    // Filter options
    // -----------------------------------------------------------------------
    /// Sweep only resources whose identifier matches this regex pattern.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Filter")]
    pub filter_include_regex: Option<String>,

    /// Exclude resources whose identifier matches this regex pattern.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Filter")]
    pub filter_exclude_regex: Option<String>,

    /// Sweep only resources whose tags match this regex pattern.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Filter",
        long_help = r#"Sweep only resources that have tags matching a given regular expression.
Keys are sorted in alphabetical order, and '&' separated.

Example: "env=(dev|sandbox)&team=storage""#)]
    pub filter_include_tag_regex: Option<String>,

    /// Exclude resources whose tags match this regex pattern.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Filter",
        long_help = r#"Do not sweep resources that have tags matching a given regular expression.
Keys are sorted in alphabetical order, and '&' separated.

Example: "keep=true""#)]
    pub filter_exclude_tag_regex: Option<String>,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of concurrent remove workers (1–65535).
    #[arg(long, env, default_value_t = DEFAULT_WORKER_SIZE, help_heading = "Performance")]
    pub worker_size: u16,

    /// Scanner channel queue size.
    #[arg(long, env, default_value_t = DEFAULT_SCAN_QUEUE_SIZE, help_heading = "Performance")]
    pub scan_queue_size: u32,

    /// Treat per-resource removal failures as fatal errors.
    #[arg(long, env, default_value_t = DEFAULT_WARN_AS_ERROR, help_heading = "Performance")]
    pub warn_as_error: bool,

    // -----------------------------------------------------------------------
    // AWS client options
    // -----------------------------------------------------------------------
    /// AWS profile name.
    #[arg(long, env = "AWSWEEP_PROFILE", conflicts_with_all = ["access_key", "secret_access_key"], help_heading = "AWS")]
    pub profile: Option<String>,

    /// AWS access key (requires --secret-access-key).
    #[arg(long, env, help_heading = "AWS")]
    pub access_key: Option<String>,

    /// AWS secret access key (requires --access-key).
    #[arg(long, env, help_heading = "AWS")]
    pub secret_access_key: Option<String>,

    /// AWS session token.
    #[arg(long, env, help_heading = "AWS")]
    pub session_token: Option<String>,

    /// Custom endpoint URL (e.g. for LocalStack).
    #[arg(long, env, help_heading = "AWS")]
    pub endpoint_url: Option<String>,

    /// Maximum SDK retry attempts per API call.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "AWS")]
    pub aws_max_attempts: u32,

    /// Initial backoff for SDK retries, in milliseconds.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "AWS")]
    pub initial_backoff_milliseconds: u64,

    /// Operation timeout, in milliseconds.
    #[arg(long, env, help_heading = "AWS")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout, in milliseconds.
    #[arg(long, env, help_heading = "AWS")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connect timeout, in milliseconds.
    #[arg(long, env, help_heading = "AWS")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout, in milliseconds.
    #[arg(long, env, help_heading = "AWS")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // Tracing options
    // -----------------------------------------------------------------------
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Emit logs as JSON.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Tracing")]
    pub json_tracing: bool,

    /// Also trace AWS SDK internals.
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Tracing")]
    pub aws_sdk_tracing: bool,

    /// Emit span open/close events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Tracing")]
    pub span_events_tracing: bool,

    /// Disable ANSI colors in log output.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Tracing")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Misc
    // -----------------------------------------------------------------------
    /// Generate a shell completion script and exit.
    #[arg(long, env, help_heading = "Misc")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

/// Parse CLI arguments from an iterator (for tests and library callers).
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

fn compile_regex(pattern: &Option<String>) -> Result<Option<Regex>, String> {
    match pattern {
        None => Ok(None),
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .map_err(|e| format!("{ERROR_MESSAGE_INVALID_REGEX}: {e}")),
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        if args.auto_complete_shell.is_some() {
            return Ok(Config {
                auto_complete_shell: args.auto_complete_shell,
                ..Config::default()
            });
        }

        if args.regions.is_empty() {
            return Err(ERROR_MESSAGE_NO_REGION.to_string());
        }
        if args.worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        if args.scan_queue_size == 0 {
            return Err(ERROR_MESSAGE_SCAN_QUEUE_SIZE_ZERO.to_string());
        }

        let credential = if let Some(profile) = args.profile {
            AwsCredentials::Profile(profile)
        } else {
            match (args.access_key, args.secret_access_key) {
                (Some(access_key), Some(secret_access_key)) => AwsCredentials::Credentials {
                    access_keys: AccessKeys {
                        access_key,
                        secret_access_key,
                        session_token: args.session_token,
                    },
                },
                (None, None) => AwsCredentials::FromEnvironment,
                _ => return Err(ERROR_MESSAGE_INCOMPLETE_ACCESS_KEYS.to_string()),
            }
        };

        let client_config = ClientConfig {
            credential,
            endpoint_url: args.endpoint_url,
            retry_config: RetryConfig {
                aws_max_attempts: args.aws_max_attempts,
                initial_backoff_milliseconds: args.initial_backoff_milliseconds,
            },
            timeout_config: CliTimeoutConfig {
                operation_timeout_milliseconds: args.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: args.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: args.connect_timeout_milliseconds,
                read_timeout_milliseconds: args.read_timeout_milliseconds,
            },
        };

        let filter_config = FilterConfig {
            include_regex: compile_regex(&args.filter_include_regex)?,
            exclude_regex: compile_regex(&args.filter_exclude_regex)?,
            include_tag_regex: compile_regex(&args.filter_include_tag_regex)?,
            exclude_tag_regex: compile_regex(&args.filter_exclude_tag_regex)?,
        };

        let mut settings = Settings::default();
        for entry in &args.settings {
            // Validated by the clap value parser.
            let (resource_type, toggle) = entry
                .split_once(':')
                .ok_or_else(|| format!("Invalid setting '{entry}'."))?;
            settings.enable(resource_type, toggle);
        }

        let tracing_config = args.verbosity.log_level().map(|tracing_level| TracingConfig {
            tracing_level,
            json_tracing: args.json_tracing,
            aws_sdk_tracing: args.aws_sdk_tracing,
            span_events_tracing: args.span_events_tracing,
            disable_color_tracing: args.disable_color_tracing,
        });

        Ok(Config {
            regions: args.regions,
            account_id: args.account_id,
            blocklist: args.blocklist,
            skip_account_check: false,
            client_config: Some(client_config),
            tracing_config,
            worker_size: args.worker_size,
            warn_as_error: args.warn_as_error,
            dry_run: args.dry_run,
            force: args.force,
            max_delete: args.max_delete,
            resource_types: args.resource_types,
            exclude_resource_types: args.exclude_resource_types,
            filter_config,
            settings,
            scan_queue_size: args.scan_queue_size,
            show_no_progress: args.show_no_progress,
            log_sweep_summary: true,
            auto_complete_shell: None,
        })
    }
}
