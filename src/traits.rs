use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;

/// Bytes fetched from the object store, plus what the store says they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Object storage the pipeline reads images from and writes masks to.
///
/// Implementations map a missing object to `RetrievalKind::NotFound` and any
/// other failure to `RetrievalKind::Unavailable` (reads) or `Persist` (writes).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()>;
}

/// A remote model that takes a serialized request body and returns the raw
/// response body.
///
/// Timeouts and retries belong to the implementation's client; the pipeline
/// calls `invoke` exactly once per event.
#[async_trait]
pub trait InferenceEndpoint: Send + Sync {
    async fn invoke(&self, body: Bytes, content_type: &str) -> Result<Bytes>;

    fn endpoint_name(&self) -> &str;
}
