use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::generation::GenerationParams;
use crate::models::job::JobInput;

/// Message recorded on a job when the backend runs out of GPU memory.
pub const OUT_OF_MEMORY_MESSAGE: &str =
    "Processing failed due to insufficient GPU memory. Try a smaller image size or reduce batch size.";

/// Runs the diffusion model on one job's input.
///
/// Calls may take minutes. The worker never runs two at once.
#[async_trait]
pub trait InferenceExecutor: Send + Sync {
    async fn run(&self, input: JobInput) -> Result<Vec<u8>, ExecutionError>;
}

/// Client for a model-serving backend that hosts the image editing pipeline.
pub struct RemoteInferenceClient {
    http: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    /// Base64-encoded input image.
    image: String,
    image_format: &'a str,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Deserialize)]
struct GenerateResponse {
    /// Base64-encoded PNG.
    image: String,
}

impl RemoteInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self, ExecutionError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl InferenceExecutor for RemoteInferenceClient {
    async fn run(&self, input: JobInput) -> Result<Vec<u8>, ExecutionError> {
        let request_body = GenerateRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&input.image),
            image_format: input.image_format.extensions_str().first().copied().unwrap_or("png"),
            params: &input.params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_backend_error(status, body));
        }

        let generated: GenerateResponse = response.json().await?;
        let png = base64::engine::general_purpose::STANDARD.decode(generated.image)?;
        Ok(png)
    }
}

fn classify_backend_error(status: StatusCode, body: String) -> ExecutionError {
    if status == StatusCode::INSUFFICIENT_STORAGE
        || body.to_ascii_lowercase().contains("out of memory")
    {
        ExecutionError::ResourceExhausted(body)
    } else {
        ExecutionError::Backend {
            status: status.as_u16(),
            body,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Inference backend ran out of memory: {0}")]
    ResourceExhausted(String),

    #[error("Failed to decode generated image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Inference panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    /// Human-readable message stored on the failed job.
    pub fn job_message(&self) -> String {
        match self {
            ExecutionError::ResourceExhausted(_) => OUT_OF_MEMORY_MESSAGE.to_string(),
            ExecutionError::Panicked(_) => "An unexpected server error occurred.".to_string(),
            other => other.to_string(),
        }
    }
}
