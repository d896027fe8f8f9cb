//! API Gateway REST APIs.
//!
//! `DeleteRestApi` is throttled hard by AWS (roughly one request per 30
//! seconds per account, with a small burst). A process-wide token bucket
//! paces deletions below that limit so bulk sweeps do not drown in
//! `TooManyRequestsException` retries.

use std::fmt;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_apigateway::Client;
use aws_sdk_apigateway::error::SdkError;
use aws_sdk_apigateway::operation::delete_rest_api::{DeleteRestApiError, DeleteRestApiOutput};
use aws_sdk_apigateway::operation::get_rest_apis::{GetRestApisError, GetRestApisOutput};
use leaky_bucket::RateLimiter;
use tracing::debug;

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::error::SweepError;
use crate::types::properties::Properties;

pub const APIGATEWAY_REST_API_TYPE: &str = "APIGatewayRestAPI";

/// Process-wide pacing for DeleteRestApi: a burst of 5, then one token per
/// 31 seconds (the documented account limit plus a safety margin).
static DELETE_REST_API_LIMITER: LazyLock<RateLimiter> = LazyLock::new(|| {
    RateLimiter::builder()
        .max(5)
        .initial(5)
        .refill(1)
        .interval(Duration::from_secs(31))
        .fair(true)
        .build()
});

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: APIGATEWAY_REST_API_TYPE,
        scope: Scope::Region,
        lister: Arc::new(ApiGatewayRestApiLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &["ApiGatewayRestApi"],
    })
}

/// Minimal API Gateway surface used by the adapter.
#[async_trait]
pub(crate) trait ApiGatewayApi: Send + Sync {
    async fn get_rest_apis(
        &self,
        position: Option<String>,
    ) -> Result<GetRestApisOutput, SdkError<GetRestApisError>>;

    async fn delete_rest_api(
        &self,
        rest_api_id: &str,
    ) -> Result<DeleteRestApiOutput, SdkError<DeleteRestApiError>>;
}

#[async_trait]
impl ApiGatewayApi for Client {
    async fn get_rest_apis(
        &self,
        position: Option<String>,
    ) -> Result<GetRestApisOutput, SdkError<GetRestApisError>> {
        self.get_rest_apis().set_position(position).send().await
    }

    async fn delete_rest_api(
        &self,
        rest_api_id: &str,
    ) -> Result<DeleteRestApiOutput, SdkError<DeleteRestApiError>> {
        self.delete_rest_api()
            .rest_api_id(rest_api_id)
            .send()
            .await
    }
}

pub struct ApiGatewayRestApiLister {
    client: Option<Arc<dyn ApiGatewayApi>>,
}

impl ApiGatewayRestApiLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn ApiGatewayApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for ApiGatewayRestApiLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for ApiGatewayRestApiLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn ApiGatewayApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut position: Option<String> = None;

        loop {
            let output = client.get_rest_apis(position.clone()).await.map_err(|e| {
                if crate::aws::is_unsupported_region_error(&e) {
                    return anyhow!(SweepError::ListSkip {
                        resource_type: APIGATEWAY_REST_API_TYPE.to_string(),
                        reason: format!("API Gateway not available in {}", opts.region),
                    });
                }
                let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                tracing::error!(
                    region = opts.region,
                    error_code = error_code,
                    error_message = error_message,
                    "APIGateway GetRestApis API call failed: {} ({}).",
                    error_code,
                    error_message,
                );
                anyhow!(e).context("aws_sdk_apigateway::client::get_rest_apis() failed.")
            })?;

            for api in output.items() {
                let Some(id) = api.id() else {
                    continue;
                };
                resources.push(Arc::new(ApiGatewayRestApi {
                    client: client.clone(),
                    id: id.to_string(),
                    name: api.name().map(String::from),
                    tags: api
                        .tags()
                        .map(|tags| {
                            tags.iter()
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect()
                        })
                        .unwrap_or_default(),
                }));
            }

            position = output.position().map(String::from);
            if position.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct ApiGatewayRestApi {
    client: Arc<dyn ApiGatewayApi>,
    id: String,
    name: Option<String>,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for ApiGatewayRestApi {
    async fn remove(&self) -> Result<()> {
        DELETE_REST_API_LIMITER.acquire_one().await;

        if let Err(e) = self.client.delete_rest_api(&self.id).await {
            if sdk_error_code(&e) == Some("NotFoundException") {
                debug!(rest_api_id = %self.id, "REST API already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_apigateway::client::delete_rest_api() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Id", &self.id);
        properties.set_opt("Name", self.name.clone());
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }
}

impl fmt::Display for ApiGatewayRestApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_dummy_tracing_subscriber, make_test_lister_opts, sdk_http_response};
    use crate::types::error::is_skip_error;
    use aws_sdk_apigateway::error::ErrorMetadata;
    use aws_sdk_apigateway::types::RestApi;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockApiGateway {
        pages: Mutex<VecDeque<GetRestApisOutput>>,
        list_error: Option<&'static str>,
        delete_calls: Mutex<Vec<String>>,
        delete_error: Option<&'static str>,
    }

    #[async_trait]
    impl ApiGatewayApi for MockApiGateway {
        async fn get_rest_apis(
            &self,
            _position: Option<String>,
        ) -> Result<GetRestApisOutput, SdkError<GetRestApisError>> {
            if let Some(code) = self.list_error {
                return Err(SdkError::service_error(
                    GetRestApisError::generic(ErrorMetadata::builder().code(code).build()),
                    sdk_http_response(),
                ));
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| GetRestApisOutput::builder().build()))
        }

        async fn delete_rest_api(
            &self,
            rest_api_id: &str,
        ) -> Result<DeleteRestApiOutput, SdkError<DeleteRestApiError>> {
            self.delete_calls
                .lock()
                .unwrap()
                .push(rest_api_id.to_string());
            if let Some(code) = self.delete_error {
                return Err(SdkError::service_error(
                    DeleteRestApiError::generic(ErrorMetadata::builder().code(code).build()),
                    sdk_http_response(),
                ));
            }
            Ok(DeleteRestApiOutput::builder().build())
        }
    }

    #[tokio::test]
    async fn list_rest_apis_collects_all_pages() {
        init_dummy_tracing_subscriber();

        let page1 = GetRestApisOutput::builder()
            .items(RestApi::builder().id("api-1").name("orders").build())
            .position("p1")
            .build();
        let page2 = GetRestApisOutput::builder()
            .items(RestApi::builder().id("api-2").name("billing").build())
            .build();

        let mock = MockApiGateway {
            pages: Mutex::new(vec![page1, page2].into()),
            ..Default::default()
        };
        let lister = ApiGatewayRestApiLister::with_client(Arc::new(mock));
        let resources = lister.list(&make_test_lister_opts()).await.unwrap();

        let ids: Vec<String> = resources.iter().map(|r| r.to_string()).collect();
        assert_eq!(ids, vec!["api-1", "api-2"]);
        assert_eq!(resources[0].properties().get("Name"), Some("orders"));
    }

    #[tokio::test]
    async fn unavailable_region_becomes_soft_skip() {
        init_dummy_tracing_subscriber();

        let mock = MockApiGateway {
            list_error: Some("UnrecognizedClientException"),
            ..Default::default()
        };
        let lister = ApiGatewayRestApiLister::with_client(Arc::new(mock));
        let err = lister.list(&make_test_lister_opts()).await.unwrap_err();
        assert!(is_skip_error(&err));
    }

    #[tokio::test]
    async fn remove_is_paced_and_deletes_once() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockApiGateway::default());
        let api = ApiGatewayRestApi {
            client: mock.clone(),
            id: "api-1".to_string(),
            name: None,
            tags: Vec::new(),
        };

        api.remove().await.unwrap();
        assert_eq!(mock.delete_calls.lock().unwrap().as_slice(), ["api-1"]);
    }

    #[tokio::test]
    async fn remove_tolerates_not_found() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockApiGateway {
            delete_error: Some("NotFoundException"),
            ..Default::default()
        });
        let api = ApiGatewayRestApi {
            client: mock,
            id: "api-gone".to_string(),
            name: None,
            tags: Vec::new(),
        };

        assert!(api.remove().await.is_ok());
    }
}
