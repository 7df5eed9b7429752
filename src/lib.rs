pub mod config;
pub mod endpoint;
pub mod errors;
pub mod event;
pub mod model;
pub mod render;
pub mod stage;
pub mod storage;
pub mod traits;

pub mod mocks;

use bytes::Bytes;
use ndarray::Array2;
use tracing::{debug, error, info, warn};

pub use config::{Config, ErrorPolicy, ResizeFilter};
pub use endpoint::SageMakerEndpoint;
pub use errors::{PipelineError, Result, RetrievalKind};
pub use event::{ObjectLocation, S3Event};
pub use stage::Stage;
pub use storage::S3ObjectStore;
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

const REQUEST_CONTENT_TYPE: &str = "application/json";

/// One image in, one mask out.
///
/// Holds only read-only configuration and collaborator handles, so a single
/// instance can serve concurrent invocations behind a shared reference.
pub struct MaskPipeline<S: ObjectStore, E: InferenceEndpoint> {
    store: S,
    endpoint: E,
    config: Config,
}

impl<S: ObjectStore, E: InferenceEndpoint> MaskPipeline<S, E> {
    pub const fn new(store: S, endpoint: E, config: Config) -> Self {
        Self {
            store,
            endpoint,
            config,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Entry point for a storage notification.
    ///
    /// Only the first record is processed. Failures are logged and turned into
    /// `Ok(false)` under `ErrorPolicy::Report`, and returned as-is under
    /// `ErrorPolicy::Propagate`.
    pub async fn handle_event(&self, event: &S3Event) -> Result<bool> {
        debug!(event = ?event, "received S3 event");
        if event.records.len() > 1 {
            warn!(
                records = event.records.len(),
                "event carries more than one record; only the first is processed"
            );
        }

        let outcome = match event.first_location() {
            Ok(location) => self.run(&location).await,
            Err(e) => Err(e),
        };

        let Err(e) = outcome else {
            return Ok(true);
        };

        error!(
            stage = %Stage::Failed,
            failed_at = %e.stage(),
            error = %e,
            "segmentation pipeline failed"
        );
        match self.config.error_policy {
            ErrorPolicy::Report => Ok(false),
            ErrorPolicy::Propagate => Err(e),
        }
    }

    /// Runs every stage for one object and returns the key the mask was
    /// written to. Nothing is written unless all earlier stages succeed.
    pub async fn run(&self, location: &ObjectLocation) -> Result<String> {
        let ObjectLocation { bucket, key } = location;

        info!(stage = %Stage::Fetching, bucket = %bucket, key = %key, "retrieving image");
        let object = self.store.get_object(bucket, key).await?;
        info!(
            content_type = object.content_type.as_deref().unwrap_or("unknown"),
            len = object.bytes.len(),
            "image retrieved"
        );

        info!(stage = %Stage::Decoding, "decoding and resizing");
        let image = model::decode_and_resize(
            &object.bytes,
            self.config.image_size,
            self.config.resize_filter.filter_type(),
        )
        .map_err(|e| PipelineError::Decode {
            key: key.clone(),
            operation: "image decode and resize".to_string(),
            source: Box::new(e),
        })?;
        let tensor = model::to_input_tensor(&image, self.config.normalize);
        drop(image);
        info!(shape = ?tensor.shape(), "input tensor ready");

        info!(
            stage = %Stage::Invoking,
            endpoint = self.endpoint.endpoint_name(),
            "invoking endpoint"
        );
        let size = self.config.image_size as usize;
        let predictions = self.invoke(&tensor, [1, size, size, 1]).await?;

        info!(
            stage = %Stage::Thresholding,
            threshold = self.config.threshold,
            "thresholding predictions"
        );
        let binary = model::threshold(predictions.view(), self.config.threshold);
        let mask = model::select_mask(binary.view());

        info!(stage = %Stage::Persisting, "rendering and uploading mask");
        let output_key = location.output_key(&self.config.output_prefix);
        self.persist(location, &mask, &output_key).await?;

        info!(
            stage = %Stage::Succeeded,
            output = %format!("s3://{bucket}/{output_key}"),
            "cell segmentation mask saved"
        );
        Ok(output_key)
    }

    async fn invoke(
        &self,
        tensor: &ndarray::Array4<f32>,
        expected: [usize; 4],
    ) -> Result<ndarray::Array4<f32>> {
        let endpoint = self.endpoint.endpoint_name();

        let body = model::encode_request(tensor.view(), &self.config.input_key)
            .map_err(|e| PipelineError::inference(endpoint, "request encoding", e))?;

        let response = tokio::time::timeout(
            self.config.request_timeout(),
            self.endpoint.invoke(Bytes::from(body), REQUEST_CONTENT_TYPE),
        )
        .await
        .map_err(|e| PipelineError::inference(endpoint, "invoke endpoint", e))??;

        model::decode_response(&response, expected)
            .map_err(|e| PipelineError::inference(endpoint, "response decoding", e))
    }

    async fn persist(
        &self,
        location: &ObjectLocation,
        mask: &Array2<u8>,
        output_key: &str,
    ) -> Result<()> {
        let format = render::output_format(&location.key);
        let image = render::render_mask(mask.view());

        let scratch_dir = self.config.scratch_dir();
        let scratch = render::write_scratch(&scratch_dir, &image, format).map_err(|e| {
            PipelineError::persist(scratch_dir.display().to_string(), "scratch write", e)
        })?;
        let bytes = tokio::fs::read(scratch.path()).await?;

        self.store
            .put_object(
                &location.bucket,
                output_key,
                Bytes::from(bytes),
                render::content_type(format),
            )
            .await
    }
}
