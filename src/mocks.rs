use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::errors::{PipelineError, Result, RetrievalKind};
use crate::traits::{InferenceEndpoint, ObjectStore, StoredObject};

/// In-memory object store for tests.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    puts: Mutex<Vec<String>>,
    gets: AtomicUsize,
    unavailable: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the store could not be reached.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn with_object(self, bucket: &str, key: &str, bytes: impl Into<Bytes>) -> Self {
        self.insert(bucket, key, bytes.into(), None);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: Bytes, content_type: Option<&str>) {
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// `bucket/key` of every successful put, in order.
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().clone()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let kind = if self.unavailable {
            RetrievalKind::Unavailable
        } else if let Some(object) = self.object(bucket, key) {
            return Ok(object);
        } else {
            RetrievalKind::NotFound
        };

        Err(PipelineError::Retrieval {
            bucket: bucket.to_string(),
            key: key.to_string(),
            kind,
            source: format!("{kind}: {bucket}/{key}").into(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        if self.unavailable {
            return Err(PipelineError::persist(
                format!("{bucket}/{key}"),
                "object upload",
                "store unavailable",
            ));
        }
        self.insert(bucket, key, bytes, Some(content_type));
        self.puts.lock().push(format!("{bucket}/{key}"));
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum MockResponse {
    Fill(f32),
    Raw(Bytes),
    Fail,
}

/// Mock inference endpoint for tests.
///
/// Answers with an all-zero prediction unless configured otherwise.
#[derive(Debug)]
pub struct MockEndpoint {
    pub image_size: u32,
    response: MockResponse,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Bytes>>,
}

impl MockEndpoint {
    pub fn new(image_size: u32) -> Self {
        Self {
            image_size,
            response: MockResponse::Fill(0.0),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every prediction is `value`.
    pub fn with_fill(mut self, value: f32) -> Self {
        self.response = MockResponse::Fill(value);
        self
    }

    /// Responds with exactly these bytes.
    pub fn with_raw_response(mut self, body: impl Into<Bytes>) -> Self {
        self.response = MockResponse::Raw(body.into());
        self
    }

    pub fn failing(mut self) -> Self {
        self.response = MockResponse::Fail;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Bytes> {
        self.requests.lock().clone()
    }

    fn filled_predictions(&self, value: f32) -> Result<Bytes> {
        let size = self.image_size as usize;
        let predictions = vec![vec![vec![vec![value]; size]; size]];
        serde_json::to_vec(&serde_json::json!({ "predictions": predictions }))
            .map(Bytes::from)
            .map_err(|e| PipelineError::inference("mock", "response encoding", e))
    }
}

#[async_trait]
impl InferenceEndpoint for MockEndpoint {
    async fn invoke(&self, body: Bytes, _content_type: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(body);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.response {
            MockResponse::Fill(value) => self.filled_predictions(*value),
            MockResponse::Raw(bytes) => Ok(bytes.clone()),
            MockResponse::Fail => Err(PipelineError::inference(
                "mock",
                "invoke endpoint",
                "model returned an error",
            )),
        }
    }

    fn endpoint_name(&self) -> &str {
        "mock"
    }
}

/// Mock endpoint sized for the default 512×512 model.
pub fn create_mock_endpoint() -> MockEndpoint {
    MockEndpoint::new(512)
}
