//! S3 buckets.
//!
//! A bucket must be empty before `DeleteBucket` succeeds, so removal first
//! drains it: all object versions and delete markers are listed (paginated)
//! and deleted through the batch DeleteObjects API (up to 1000 keys per
//! request), then the bucket itself is deleted. Buckets are global to the
//! account but live in one region; the lister only yields buckets homed in
//! the region being scanned.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::delete_bucket::DeleteBucketError;
use aws_sdk_s3::operation::delete_objects::{DeleteObjectsError, DeleteObjectsOutput};
use aws_sdk_s3::operation::get_bucket_location::{
    GetBucketLocationError, GetBucketLocationOutput,
};
use aws_sdk_s3::operation::get_bucket_tagging::{GetBucketTaggingError, GetBucketTaggingOutput};
use aws_sdk_s3::operation::list_buckets::{ListBucketsError, ListBucketsOutput};
use aws_sdk_s3::operation::list_object_versions::{
    ListObjectVersionsError, ListObjectVersionsOutput,
};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::{debug, warn};

use crate::aws::sdk_error_code;
use crate::registry::{Registration, Registry};
use crate::resource::{ListerOpts, Resource, ResourceLister};
use crate::types::Scope;
use crate::types::properties::Properties;

pub const S3_BUCKET_TYPE: &str = "S3Bucket";

/// Maximum keys per batch DeleteObjects API call (S3 limit).
const MAX_BATCH_SIZE: usize = 1000;

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Registration {
        name: S3_BUCKET_TYPE,
        scope: Scope::Region,
        lister: Arc::new(S3BucketLister::new()),
        depends_on: &[],
        settings: &[],
        deprecated_aliases: &[],
    })
}

/// Minimal S3 surface used by the adapter.
#[async_trait]
pub(crate) trait S3Api: Send + Sync {
    async fn list_buckets(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ListBucketsOutput, SdkError<ListBucketsError>>;

    async fn get_bucket_location(
        &self,
        bucket: &str,
    ) -> Result<GetBucketLocationOutput, SdkError<GetBucketLocationError>>;

    async fn get_bucket_tagging(
        &self,
        bucket: &str,
    ) -> Result<GetBucketTaggingOutput, SdkError<GetBucketTaggingError>>;

    async fn list_object_versions(
        &self,
        bucket: &str,
        key_marker: Option<String>,
        version_id_marker: Option<String>,
    ) -> Result<ListObjectVersionsOutput, SdkError<ListObjectVersionsError>>;

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> Result<DeleteObjectsOutput, SdkError<DeleteObjectsError>>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), SdkError<DeleteBucketError>>;
}

#[async_trait]
impl S3Api for Client {
    async fn list_buckets(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ListBucketsOutput, SdkError<ListBucketsError>> {
        self.list_buckets()
            .set_continuation_token(continuation_token)
            .send()
            .await
    }

    async fn get_bucket_location(
        &self,
        bucket: &str,
    ) -> Result<GetBucketLocationOutput, SdkError<GetBucketLocationError>> {
        self.get_bucket_location().bucket(bucket).send().await
    }

    async fn get_bucket_tagging(
        &self,
        bucket: &str,
    ) -> Result<GetBucketTaggingOutput, SdkError<GetBucketTaggingError>> {
        self.get_bucket_tagging().bucket(bucket).send().await
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        key_marker: Option<String>,
        version_id_marker: Option<String>,
    ) -> Result<ListObjectVersionsOutput, SdkError<ListObjectVersionsError>> {
        self.list_object_versions()
            .bucket(bucket)
            .set_key_marker(key_marker)
            .set_version_id_marker(version_id_marker)
            .max_keys(1000)
            .send()
            .await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> Result<DeleteObjectsOutput, SdkError<DeleteObjectsError>> {
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(SdkError::construction_failure)?;
        self.delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), SdkError<DeleteBucketError>> {
        self.delete_bucket().bucket(bucket).send().await.map(|_| ())
    }
}

/// The region a bucket is homed in, from its location constraint.
///
/// Buckets created in us-east-1 report no constraint; very old buckets in
/// eu-west-1 report the legacy `EU` constraint.
fn bucket_region(output: &GetBucketLocationOutput) -> String {
    match output.location_constraint() {
        None => "us-east-1".to_string(),
        Some(constraint) => match constraint.as_str() {
            "" => "us-east-1".to_string(),
            "EU" => "eu-west-1".to_string(),
            other => other.to_string(),
        },
    }
}

pub struct S3BucketLister {
    client: Option<Arc<dyn S3Api>>,
}

impl S3BucketLister {
    pub fn new() -> Self {
        Self { client: None }
    }

    #[cfg(test)]
    fn with_client(client: Arc<dyn S3Api>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Default for S3BucketLister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLister for S3BucketLister {
    async fn list(&self, opts: &ListerOpts) -> Result<Vec<Arc<dyn Resource>>> {
        let client: Arc<dyn S3Api> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(Client::new(&opts.sdk_config)),
        };

        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = client
                .list_buckets(continuation_token.clone())
                .await
                .map_err(|e| {
                    let (error_code, error_message) = crate::aws::extract_sdk_error_details(&e);
                    tracing::error!(
                        region = opts.region,
                        error_code = error_code,
                        error_message = error_message,
                        "S3 ListBuckets API call failed: {} ({}).",
                        error_code,
                        error_message,
                    );
                    anyhow!(e).context("aws_sdk_s3::client::list_buckets() failed.")
                })?;

            for bucket in output.buckets() {
                let Some(name) = bucket.name() else {
                    continue;
                };

                let location = client.get_bucket_location(name).await.map_err(|e| {
                    anyhow!(e).context("aws_sdk_s3::client::get_bucket_location() failed.")
                })?;
                if bucket_region(&location) != opts.region {
                    continue;
                }

                // Tag fetch is best-effort; NoSuchTagSet simply means untagged.
                let mut tags: Vec<(String, String)> = Vec::new();
                match client.get_bucket_tagging(name).await {
                    Ok(tag_output) => {
                        for tag in tag_output.tag_set() {
                            tags.push((tag.key().to_string(), tag.value().to_string()));
                        }
                    }
                    Err(e) => {
                        if sdk_error_code(&e) != Some("NoSuchTagSet") {
                            warn!(
                                bucket = name,
                                error = %e,
                                "could not fetch tags for bucket, continuing without them."
                            );
                        }
                    }
                }

                resources.push(Arc::new(S3Bucket {
                    client: client.clone(),
                    name: name.to_string(),
                    region: opts.region.clone(),
                    tags,
                }));
            }

            continuation_token = output.continuation_token().map(String::from);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }
}

pub struct S3Bucket {
    client: Arc<dyn S3Api>,
    name: String,
    region: String,
    tags: Vec<(String, String)>,
}

impl S3Bucket {
    /// Drain the bucket: list every object version and delete marker and
    /// delete them through the batch API, 1000 keys at a time.
    async fn empty_bucket(&self) -> Result<()> {
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_object_versions(&self.name, key_marker.clone(), version_id_marker.clone())
                .await
                .map_err(|e| {
                    anyhow!(e).context("aws_sdk_s3::client::list_object_versions() failed.")
                })?;

            let mut identifiers: Vec<ObjectIdentifier> = Vec::new();
            for version in output.versions() {
                let mut builder = ObjectIdentifier::builder().key(version.key().unwrap_or_default());
                if let Some(version_id) = version.version_id() {
                    builder = builder.version_id(version_id);
                }
                identifiers.push(
                    builder
                        .build()
                        .map_err(|e| anyhow!(e).context("ObjectIdentifier build failed."))?,
                );
            }
            for marker in output.delete_markers() {
                let mut builder = ObjectIdentifier::builder().key(marker.key().unwrap_or_default());
                if let Some(version_id) = marker.version_id() {
                    builder = builder.version_id(version_id);
                }
                identifiers.push(
                    builder
                        .build()
                        .map_err(|e| anyhow!(e).context("ObjectIdentifier build failed."))?,
                );
            }

            for chunk in identifiers.chunks(MAX_BATCH_SIZE) {
                debug!(
                    bucket = %self.name,
                    batch_size = chunk.len(),
                    "sending DeleteObjects batch request."
                );
                let response = self
                    .client
                    .delete_objects(&self.name, chunk.to_vec())
                    .await
                    .map_err(|e| {
                        anyhow!(e).context("aws_sdk_s3::client::delete_objects() failed.")
                    })?;

                let failed = response.errors();
                if !failed.is_empty() {
                    for err in failed {
                        warn!(
                            bucket = %self.name,
                            key = err.key().unwrap_or("unknown"),
                            error_code = err.code().unwrap_or("unknown"),
                            error_message = err.message().unwrap_or("no message"),
                            "failed to delete object."
                        );
                    }
                    bail!(
                        "emptying bucket '{}' failed: {} objects could not be deleted.",
                        self.name,
                        failed.len()
                    );
                }
            }

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                version_id_marker = output.next_version_id_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Resource for S3Bucket {
    async fn remove(&self) -> Result<()> {
        self.empty_bucket().await?;

        if let Err(e) = self.client.delete_bucket(&self.name).await {
            if sdk_error_code(&e) == Some("NoSuchBucket") {
                debug!(bucket = %self.name, "bucket already removed.");
                return Ok(());
            }
            return Err(anyhow!(e).context("aws_sdk_s3::client::delete_bucket() failed."));
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.set("Name", &self.name);
        properties.set("Region", &self.region);
        for (key, value) in &self.tags {
            properties.set_tag(key, value.clone());
        }
        properties
    }
}

impl fmt::Display for S3Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_dummy_tracing_subscriber, make_test_lister_opts, sdk_http_response};
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::types::{
        Bucket, BucketLocationConstraint, DeleteMarkerEntry, Error as S3Error, ObjectVersion, Tag,
    };
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockS3 {
        bucket_pages: Mutex<VecDeque<ListBucketsOutput>>,
        locations: Mutex<HashMap<String, Option<BucketLocationConstraint>>>,
        version_pages: Mutex<VecDeque<ListObjectVersionsOutput>>,
        delete_objects_calls: Mutex<Vec<Vec<(String, Option<String>)>>>,
        delete_bucket_calls: Mutex<Vec<String>>,
        delete_objects_errors: bool,
        delete_bucket_error: Option<&'static str>,
    }

    #[async_trait]
    impl S3Api for MockS3 {
        async fn list_buckets(
            &self,
            _continuation_token: Option<String>,
        ) -> Result<ListBucketsOutput, SdkError<ListBucketsError>> {
            Ok(self
                .bucket_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ListBucketsOutput::builder().build()))
        }

        async fn get_bucket_location(
            &self,
            bucket: &str,
        ) -> Result<GetBucketLocationOutput, SdkError<GetBucketLocationError>> {
            let constraint = self
                .locations
                .lock()
                .unwrap()
                .get(bucket)
                .cloned()
                .flatten();
            Ok(GetBucketLocationOutput::builder()
                .set_location_constraint(constraint)
                .build())
        }

        async fn get_bucket_tagging(
            &self,
            _bucket: &str,
        ) -> Result<GetBucketTaggingOutput, SdkError<GetBucketTaggingError>> {
            Ok(GetBucketTaggingOutput::builder()
                .tag_set(Tag::builder().key("env").value("dev").build().unwrap())
                .build()
                .unwrap())
        }

        async fn list_object_versions(
            &self,
            _bucket: &str,
            _key_marker: Option<String>,
            _version_id_marker: Option<String>,
        ) -> Result<ListObjectVersionsOutput, SdkError<ListObjectVersionsError>> {
            Ok(self
                .version_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ListObjectVersionsOutput::builder().build()))
        }

        async fn delete_objects(
            &self,
            _bucket: &str,
            objects: Vec<ObjectIdentifier>,
        ) -> Result<DeleteObjectsOutput, SdkError<DeleteObjectsError>> {
            self.delete_objects_calls.lock().unwrap().push(
                objects
                    .iter()
                    .map(|o| (o.key().to_string(), o.version_id().map(String::from)))
                    .collect(),
            );
            if self.delete_objects_errors {
                return Ok(DeleteObjectsOutput::builder()
                    .errors(
                        S3Error::builder()
                            .key("stuck.txt")
                            .code("AccessDenied")
                            .message("denied")
                            .build(),
                    )
                    .build());
            }
            Ok(DeleteObjectsOutput::builder().build())
        }

        async fn delete_bucket(&self, bucket: &str) -> Result<(), SdkError<DeleteBucketError>> {
            self.delete_bucket_calls
                .lock()
                .unwrap()
                .push(bucket.to_string());
            if let Some(code) = self.delete_bucket_error {
                return Err(SdkError::service_error(
                    DeleteBucketError::generic(ErrorMetadata::builder().code(code).build()),
                    sdk_http_response(),
                ));
            }
            Ok(())
        }
    }

    fn bucket(name: &str) -> Bucket {
        Bucket::builder().name(name).build()
    }

    #[tokio::test]
    async fn lister_keeps_only_buckets_in_scan_region() {
        init_dummy_tracing_subscriber();

        let page = ListBucketsOutput::builder()
            .buckets(bucket("in-region"))
            .buckets(bucket("elsewhere"))
            .build();

        let mut locations = HashMap::new();
        // No constraint → us-east-1 (the scan region of the test opts).
        locations.insert("in-region".to_string(), None);
        locations.insert(
            "elsewhere".to_string(),
            Some(BucketLocationConstraint::from("eu-central-1")),
        );

        let mock = MockS3 {
            bucket_pages: Mutex::new(vec![page].into()),
            locations: Mutex::new(locations),
            ..Default::default()
        };
        let lister = S3BucketLister::with_client(Arc::new(mock));
        let resources = lister.list(&make_test_lister_opts()).await.unwrap();

        let ids: Vec<String> = resources.iter().map(|r| r.to_string()).collect();
        assert_eq!(ids, vec!["in-region"]);
        assert_eq!(resources[0].properties().get("tag:env"), Some("dev"));
    }

    #[tokio::test]
    async fn remove_drains_versions_and_markers_then_deletes_bucket() {
        init_dummy_tracing_subscriber();

        let page1 = ListObjectVersionsOutput::builder()
            .versions(
                ObjectVersion::builder()
                    .key("file1.txt")
                    .version_id("v1")
                    .build(),
            )
            .versions(
                ObjectVersion::builder()
                    .key("file1.txt")
                    .version_id("v2")
                    .build(),
            )
            .is_truncated(true)
            .next_key_marker("file1.txt")
            .next_version_id_marker("v2")
            .build();
        let page2 = ListObjectVersionsOutput::builder()
            .delete_markers(
                DeleteMarkerEntry::builder()
                    .key("file2.txt")
                    .version_id("dm1")
                    .build(),
            )
            .is_truncated(false)
            .build();

        let mock = Arc::new(MockS3 {
            version_pages: Mutex::new(vec![page1, page2].into()),
            ..Default::default()
        });
        let bucket = S3Bucket {
            client: mock.clone(),
            name: "doomed".to_string(),
            region: "us-east-1".to_string(),
            tags: Vec::new(),
        };

        bucket.remove().await.unwrap();

        let calls = mock.delete_objects_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            vec![
                ("file1.txt".to_string(), Some("v1".to_string())),
                ("file1.txt".to_string(), Some("v2".to_string())),
            ]
        );
        assert_eq!(
            calls[1],
            vec![("file2.txt".to_string(), Some("dm1".to_string()))]
        );
        assert_eq!(
            mock.delete_bucket_calls.lock().unwrap().as_slice(),
            ["doomed"]
        );
    }

    #[tokio::test]
    async fn remove_empty_bucket_skips_batch_delete() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockS3::default());
        let bucket = S3Bucket {
            client: mock.clone(),
            name: "empty".to_string(),
            region: "us-east-1".to_string(),
            tags: Vec::new(),
        };

        bucket.remove().await.unwrap();
        assert!(mock.delete_objects_calls.lock().unwrap().is_empty());
        assert_eq!(mock.delete_bucket_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_batch_failure_aborts_removal() {
        init_dummy_tracing_subscriber();

        let page = ListObjectVersionsOutput::builder()
            .versions(ObjectVersion::builder().key("stuck.txt").build())
            .is_truncated(false)
            .build();

        let mock = Arc::new(MockS3 {
            version_pages: Mutex::new(vec![page].into()),
            delete_objects_errors: true,
            ..Default::default()
        });
        let bucket = S3Bucket {
            client: mock.clone(),
            name: "doomed".to_string(),
            region: "us-east-1".to_string(),
            tags: Vec::new(),
        };

        let err = bucket.remove().await.unwrap_err();
        assert!(err.to_string().contains("could not be deleted"));
        // The bucket delete was never attempted.
        assert!(mock.delete_bucket_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_tolerates_no_such_bucket() {
        init_dummy_tracing_subscriber();

        let mock = Arc::new(MockS3 {
            delete_bucket_error: Some("NoSuchBucket"),
            ..Default::default()
        });
        let bucket = S3Bucket {
            client: mock,
            name: "gone".to_string(),
            region: "us-east-1".to_string(),
            tags: Vec::new(),
        };

        assert!(bucket.remove().await.is_ok());
    }
}
