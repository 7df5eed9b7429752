//! SageMaker runtime-backed `InferenceEndpoint`.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::Client;
use bytes::Bytes;

use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::storage::load_sdk_config;
use crate::traits::InferenceEndpoint;

#[derive(Clone, Debug)]
pub struct SageMakerEndpoint {
    client: Client,
    endpoint_name: String,
}

impl SageMakerEndpoint {
    pub fn new(client: Client, endpoint_name: impl Into<String>) -> Self {
        Self {
            client,
            endpoint_name: endpoint_name.into(),
        }
    }

    pub fn from_sdk_config(sdk_config: &SdkConfig, config: &Config) -> Result<Self> {
        Ok(Self::new(Client::new(sdk_config), config.endpoint_name()?))
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let sdk_config = load_sdk_config(config).await?;
        Self::from_sdk_config(&sdk_config, config)
    }
}

#[async_trait]
impl InferenceEndpoint for SageMakerEndpoint {
    async fn invoke(&self, body: Bytes, content_type: &str) -> Result<Bytes> {
        let output = self
            .client
            .invoke_endpoint()
            .endpoint_name(&self.endpoint_name)
            .content_type(content_type)
            .accept("application/json")
            .body(Blob::new(body.to_vec()))
            .send()
            .await
            .map_err(|err| PipelineError::inference(&self.endpoint_name, "invoke endpoint", err))?;

        let body = output.body.ok_or_else(|| {
            PipelineError::inference(
                &self.endpoint_name,
                "invoke endpoint",
                "response has no body",
            )
        })?;
        Ok(Bytes::from(body.into_inner()))
    }

    fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }
}
