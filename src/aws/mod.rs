//! AWS SDK plumbing shared by all resource adapters: SDK config loading,
//! account identity resolution, and error-metadata helpers.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use crate::config::ClientConfig;
use crate::types::AwsCredentials;

/// Extracts the AWS error code from an SDK error.
///
/// For service errors (API responses), returns the modeled error code
/// (e.g. "AccessDenied", "ResourceNotFoundException"). For other error types
/// (network, timeout, construction failure), returns `None`.
pub fn sdk_error_code<E, R>(e: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    e.as_service_error().and_then(|service_err| service_err.code())
}

/// Extracts the error code and message from an SDK error for logging.
///
/// Non-service errors yield "N/A" as the code and the full error description
/// as the message.
pub fn extract_sdk_error_details<E, R>(e: &SdkError<E, R>) -> (String, String)
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Check whether a service error indicates the API is not usable in the
/// requested region (opt-in region, service not rolled out, no subscription).
///
/// Listers translate these into a soft-skip signal so the scanner can move on
/// instead of failing the sweep. Network-level dispatch failures are NOT
/// classified here: a transient outage must surface as a hard error.
pub fn is_unsupported_region_error<E, R>(e: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(
        sdk_error_code(e),
        Some(
            "UnrecognizedClientException"
                | "InvalidClientTokenId"
                | "SubscriptionRequiredException"
                | "OptInRequired"
                | "UnsupportedOperation"
        )
    )
}

/// Load an [`SdkConfig`] bound to the given region.
///
/// Credential resolution follows the configured source (named profile,
/// static access keys, or the default environment chain). Retry and timeout
/// settings from the [`ClientConfig`] are applied when present; with no
/// client config at all, the SDK default chain is used as-is.
pub async fn load_sdk_config(client_config: Option<&ClientConfig>, region: &str) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()));

    if let Some(client_config) = client_config {
        match &client_config.credential {
            AwsCredentials::Profile(profile_name) => {
                loader = loader.profile_name(profile_name);
            }
            AwsCredentials::Credentials { access_keys } => {
                loader = loader.credentials_provider(Credentials::from_keys(
                    access_keys.access_key.clone(),
                    access_keys.secret_access_key.clone(),
                    access_keys.session_token.clone(),
                ));
            }
            AwsCredentials::FromEnvironment => {}
        }

        if let Some(endpoint_url) = &client_config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader = loader.retry_config(
            aws_config::retry::RetryConfig::standard()
                .with_max_attempts(client_config.retry_config.aws_max_attempts)
                .with_initial_backoff(Duration::from_millis(
                    client_config.retry_config.initial_backoff_milliseconds,
                )),
        );

        let mut timeout_builder = aws_config::timeout::TimeoutConfig::builder();
        let timeouts = &client_config.timeout_config;
        if let Some(ms) = timeouts.operation_timeout_milliseconds {
            timeout_builder = timeout_builder.operation_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.operation_attempt_timeout_milliseconds {
            timeout_builder = timeout_builder.operation_attempt_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.connect_timeout_milliseconds {
            timeout_builder = timeout_builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.read_timeout_milliseconds {
            timeout_builder = timeout_builder.read_timeout(Duration::from_millis(ms));
        }
        loader = loader.timeout_config(timeout_builder.build());
    }

    loader.load().await
}

/// Resolve the account ID of the configured credentials via STS
/// GetCallerIdentity.
pub async fn resolve_account_id(sdk_config: &SdkConfig) -> Result<String> {
    let client = aws_sdk_sts::Client::new(sdk_config);
    let output = client
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| {
            let (error_code, error_message) = extract_sdk_error_details(&e);
            tracing::error!(
                error_code = error_code,
                error_message = error_message,
                "STS GetCallerIdentity API call failed: {} ({}).",
                error_code,
                error_message,
            );
            anyhow!(e).context("aws_sdk_sts::client::get_caller_identity() failed.")
        })?;

    output
        .account()
        .map(str::to_string)
        .context("STS GetCallerIdentity returned no account ID.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliTimeoutConfig, RetryConfig};
    use crate::test_utils::init_dummy_tracing_subscriber;
    use crate::types::AccessKeys;
    use aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityError;
    use aws_smithy_runtime_api::http::{Response, StatusCode};
    use aws_smithy_types::body::SdkBody;
    use aws_smithy_types::error::ErrorMetadata;

    fn make_test_client_config() -> ClientConfig {
        ClientConfig {
            credential: AwsCredentials::Credentials {
                access_keys: AccessKeys {
                    access_key: "test_key".to_string(),
                    secret_access_key: "test_secret".to_string(),
                    session_token: None,
                },
            },
            endpoint_url: Some("https://localhost:4566".to_string()),
            retry_config: RetryConfig {
                aws_max_attempts: 3,
                initial_backoff_milliseconds: 100,
            },
            timeout_config: CliTimeoutConfig {
                operation_timeout_milliseconds: Some(30000),
                operation_attempt_timeout_milliseconds: Some(10000),
                connect_timeout_milliseconds: Some(5000),
                read_timeout_milliseconds: Some(5000),
            },
        }
    }

    fn service_error(code: &str) -> SdkError<GetCallerIdentityError, Response<SdkBody>> {
        SdkError::service_error(
            GetCallerIdentityError::generic(ErrorMetadata::builder().code(code).build()),
            Response::new(StatusCode::try_from(400).unwrap(), SdkBody::empty()),
        )
    }

    #[tokio::test]
    async fn load_sdk_config_with_static_credentials() {
        init_dummy_tracing_subscriber();

        let client_config = make_test_client_config();
        let sdk_config = load_sdk_config(Some(&client_config), "us-east-1").await;

        assert_eq!(sdk_config.region().unwrap().as_ref(), "us-east-1");
        assert_eq!(
            sdk_config.endpoint_url(),
            Some("https://localhost:4566")
        );
    }

    #[tokio::test]
    async fn load_sdk_config_without_client_config() {
        init_dummy_tracing_subscriber();

        let sdk_config = load_sdk_config(None, "eu-west-1").await;
        assert_eq!(sdk_config.region().unwrap().as_ref(), "eu-west-1");
    }

    #[test]
    fn sdk_error_code_extracts_service_code() {
        let e = service_error("AccessDenied");
        assert_eq!(sdk_error_code(&e), Some("AccessDenied"));
    }

    #[test]
    fn extract_details_for_service_error() {
        let e = SdkError::service_error(
            GetCallerIdentityError::generic(
                ErrorMetadata::builder()
                    .code("ExpiredToken")
                    .message("token expired")
                    .build(),
            ),
            Response::new(StatusCode::try_from(403).unwrap(), SdkBody::empty()),
        );
        let (code, message) = extract_sdk_error_details(&e);
        assert_eq!(code, "ExpiredToken");
        assert_eq!(message, "token expired");
    }

    #[test]
    fn unsupported_region_classification() {
        assert!(is_unsupported_region_error(&service_error(
            "UnrecognizedClientException"
        )));
        assert!(is_unsupported_region_error(&service_error("OptInRequired")));
        assert!(!is_unsupported_region_error(&service_error("AccessDenied")));
        assert!(!is_unsupported_region_error(&service_error("Throttling")));
    }
}
