//! SNS topics and subscriptions.
//!
//! A subscription that has never been confirmed has no ARN (the API reports
//! the literal `PendingConfirmation`) and cannot be unsubscribed; those are
//! excluded from the sweep and disappear on their own after three days.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_sns::Client;
use aws_sdk_sns::error::SdkError;
use aws_sdk_sns::operation::delete_topic::{DeleteTopicError, DeleteTopicOutput};
use aws_sdk_sns::operation::list_subscriptions::{
    ListSubscriptionsError, ListSubscriptionsOutput,
};
use aws_sdk_sns::operation::list_tags_for_resource::{
    ListTagsForResourceError, ListTagsForResourceOutput,
};
use aws_sdk_sns::operation::list_topics::{ListTopicsError, ListTopicsOutput};
use aws_sdk_sns::operation::unsubscribe::{UnsubscribeError, UnsubscribeOutput};
use tracing::{debug, warn};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const SNS_TOPIC_TYPE: &str = "SNSTopic";
pub const SNS_SUBSCRIPTION_TYPE: &str = "SNSSubscription";

const PENDING_CONFIRMATION: &str = "PendingConfirmation";

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: SNS_SUBSCRIPTION_TYPE,
        scope: Scope::Region,
        lister: Arc::new(SnsSubscriptionLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })?;
    registry.register(Registration {
        name: SNS_TOPIC_TYPE,
        scope: Scope::Region,
        lister: Arc::new(SnsTopicLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })
}

/// Minimal SNS surface used by the adapters.
#[async_trait]
pub(crate) trait SnsApi: Send + Sync {
    async fn list_topics(
        &self,
        next_token: Option<String>,
    ) -> Result<ListTopicsOutput, SdkError<ListTopicsError>>;

    async fn list_tags_for_resource(
        &self,
        resource_arn: &str,
    ) -> Result<ListTagsForResourceOutput, SdkError<ListTagsForResourceError>>;

    async fn delete_topic(
        &self,
        topic_arn: &str,
    ) -> Result<DeleteTopicOutput, SdkError<DeleteTopicError>>;

    async fn list_subscriptions(
        &self,
        next_token: Option<String>,
    ) -> Result<ListSubscriptionsOutput, SdkError<ListSubscriptionsError>>;

    async fn unsubscribe(
        &self,
        subscription_arn: &str,
    ) -> Result<UnsubscribeOutput, SdkError<UnsubscribeError>>;
}

#[async_trait]
impl SnsApi for Client {
    async fn list_topics(
        &self,
        next_token: Option<String>,
    ) -> Result<ListTopicsOutput, SdkError<ListTopicsError>> {
        self.list_topics().set_next_token(next_token).send().await
    }

    async fn list_tags_for_resource(
        &self,
        resource_arn: &str,
    ) -> Result<ListTagsForResourceOutput, SdkError<ListTagsForResourceError>> {
        self.list_tags_for_resource()
            .resource_arn(resource_arn)
            .send()
            .await
    }

    async fn delete_topic(
        &self,
        topic_arn: &str,
    ) -> Result<DeleteTopicOutput, SdkError<DeleteTopicError>> {
        self.delete_topic().topic_arn(topic_arn).send().await
    }

    async fn list_subscriptions(
        &self,
        next_token: Option<String>,
    ) -> Result<ListSubscriptionsOutput, SdkError<ListSubscriptionsError>> {
        self.list_subscriptions()
            .set_next_token(next_token)
            .send()
            .await
    }

    async fn unsubscribe(
        &self,
        subscription_arn: &str,
    ) -> Result<UnsubscribeOutput, SdkError<UnsubscribeError>> {
        self.unsubscribe()
            .subscription_arn(subscription_arn)
            .send()
            .await
    }
}

// ---------------------------------------------------------------------------
// SNSTopic
// ---------------------------------------------------------------------------

pub struct SnsTopicLister {
    client: Option<Arc<dyn SnsApi>>,
}

impl SnsTopicLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn SnsApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for SnsTopicLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for SnsTopicLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn SnsApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client.list_topics(next_token.clone()).await.map_err(|e| {
                let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                tracing::error!(
                    region = opts.region,
                    error_code = error_code,
                    error_message = error_message,
                    "SNS ListTopics API call failed: {} ({}).",
                    error_code,
                    error_message,
                );
                anyhow!(e).context("aws_sdk_sns::client::list_topics() failed.")
            })?;

            for topic in output.topics() {
                let Some(arn) = topic.topic_arn() else {
                    continue;
                };

                // Tag fetch is best-effort.
                let mut tags: Vec<(String, String)> = Vec::new();
                match client.list_tags_for_resource(arn).await {
                    Ok(tag_output) => {
                        for tag in tag_output.tags() {
                            tags.push((tag.key().to_string(), tag.value().to_string()));
                        }
                    }
                    Err(e) => {
                        warn!(
                            topic = arn,
                            error = %e,
                            "could not fetch tags for topic, continuing without them."
                        );
                    }
                }

                resources.push(Arc::new(SnsTopic {
                    client: client.clone(),
                    arn: arn.to_string(),
                    tags,
                }));
            }

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct SnsTopic {
    client: Arc<dyn SnsApi>,
    arn: String,
    tags: Vec<(String, String)>,
}

#[async_trait]
impl Resource for SnsTopic {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.delete_topic(&self.arn).await {
            if sdk_error_code(&e) == Some("NotFound") {
                debug!(topic = %self.arn, "topic already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_sns::client::delete_topic() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("TopicArn", &self.arn);
        // The trailing ARN segment is the topic name.
        if let Some(name) = self.arn.rsplit(':').next() {
            properties.set("Name", name);
        }
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }
}

impl fmt::Display for SnsTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arn)
    }
}

// ---------------------------------------------------------------------------
// SNSSubscription
// ---------------------------------------------------------------------------

pub struct SnsSubscriptionLister {
    client: Option<Arc<dyn SnsApi>>,
}

impl SnsSubscriptionLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn SnsApi>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for SnsSubscriptionLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for SnsSubscriptionLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn SnsApi> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .list_subscriptions(next_token.clone())
                .await
                .map_err(|e| {
                    let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                    tracing::error!(
                        region = opts.region,
                        error_code = error_code,
                        error_message = error_message,
                        "SNS ListSubscriptions API call failed: {} ({}).",
                        error_code,
                        error_message,
                    );
                    anyhow!(e).context("aws_sdk_sns::client::list_subscriptions() failed.")
                })?;

            for subscription in output.subscriptions() {
                let Some(arn) = subscription.subscription_arn() else {
                    continue;
                };
                resources.push(Arc::new(SnsSubscription {
                    client: client.clone(),
                    arn: arn.to_string(),
                    topic_arn: subscription.topic_arn().map(String::from),
                    protocol: subscription.protocol().map(String::from),
                    endpoint: subscription.endpoint().map(String::from),
                }));
            }

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct SnsSubscription {
    client: Arc<dyn SnsApi>,
    arn: String,
    topic_arn: Option<String>,
    protocol: Option<String>,
    endpoint: Option<String>,
}

#[async_trait]
impl Resource for SnsSubscription {
    async fn remove(&self) -> Result<()> {
        if let Err(e) = self.client.unsubscribe(&self.arn).await {
            if sdk_error_code(&e) == Some("NotFound") {
                debug!(subscription = %self.arn, "subscription already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_sns::client::unsubscribe() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("SubscriptionArn", &self.arn);
        properties.set_opt("TopicArn", self.topic_arn.clone());
        properties.set_opt("Protocol", self.protocol.clone());
        properties.set_opt("Endpoint", self.endpoint.clone());
        properties
    }

    fn filter_reason(&self) -> Option<String> {
        (self.arn == PENDING_CONFIRMATION)
            .then(|| "subscription has not been confirmed".to_string())
    }
}

impl fmt::Display for SnsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arn)
    }
}
