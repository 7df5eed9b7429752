//! S3-backed `ObjectStore`.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::config::Config;
use crate::errors::{PipelineError, Result, RetrievalKind};
use crate::traits::{ObjectStore, StoredObject};

/// Shared AWS configuration for every client the pipeline builds.
///
/// Credentials come from the default provider chain; region, timeouts and
/// attempt count come from `Config`.
pub async fn load_sdk_config(config: &Config) -> Result<SdkConfig> {
    let region = config.region()?.to_string();

    let timeouts = TimeoutConfig::builder()
        .connect_timeout(config.connect_timeout())
        .operation_timeout(config.request_timeout())
        .build();

    Ok(aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region))
        .timeout_config(timeouts)
        .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts))
        .load()
        .await)
}

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_sdk_config(sdk_config: &SdkConfig) -> Self {
        Self::new(Client::new(sdk_config))
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let sdk_config = load_sdk_config(config).await?;
        Ok(Self::from_sdk_config(&sdk_config))
    }
}

fn retrieval_kind<R>(err: &SdkError<GetObjectError, R>) -> RetrievalKind {
    match err {
        SdkError::ServiceError(service_err) if service_err.err().is_no_such_key() => {
            RetrievalKind::NotFound
        }
        _ => RetrievalKind::Unavailable,
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| PipelineError::Retrieval {
                bucket: bucket.to_string(),
                key: key.to_string(),
                kind: retrieval_kind(&err),
                source: Box::new(err),
            })?;

        let content_type = output.content_type().map(str::to_string);
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| PipelineError::Retrieval {
                bucket: bucket.to_string(),
                key: key.to_string(),
                kind: RetrievalKind::Unavailable,
                source: Box::new(err),
            })?;

        let bytes = data.into_bytes();
        debug!(bucket, key, len = bytes.len(), "fetched object");
        Ok(StoredObject {
            bytes,
            content_type,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| {
                PipelineError::persist(format!("s3://{bucket}/{key}"), "object upload", err)
            })?;
        Ok(())
    }
}
