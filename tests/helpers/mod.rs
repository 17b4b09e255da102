//! Shared helpers for driving the router in-process

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use kontext_serve::app_state::AppState;
use kontext_serve::models::job::{JobInput, JobStatus};
use kontext_serve::routes;
use kontext_serve::services::inference::{ExecutionError, InferenceExecutor};
use kontext_serve::services::queue::JobQueue;
use kontext_serve::services::storage::MemoryResultStore;
use tower::ServiceExt;
use uuid::Uuid;

pub const BOUNDARY: &str = "kontext-test-boundary";
pub const GENERATED_PNG: &[u8] = b"\x89PNG generated";

pub struct TestApp {
    pub router: Router,
    pub queue: Arc<JobQueue>,
    pub store: Arc<MemoryResultStore>,
}

impl TestApp {
    pub fn new(max_queue_size: usize) -> Self {
        Self::with_upload_limit(max_queue_size, 10 * 1024 * 1024)
    }

    pub fn with_upload_limit(max_queue_size: usize, max_upload_bytes: usize) -> Self {
        let queue = Arc::new(JobQueue::new(max_queue_size));
        let store = Arc::new(MemoryResultStore::new());
        let state = AppState::new(queue.clone(), store.clone());
        Self {
            router: routes::router(state, max_upload_bytes),
            queue,
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn submit(&self, prompt: &str) -> Response<Body> {
        let body = MultipartBody::new()
            .text("prompt", prompt)
            .file("image", "input.png", &png_bytes());
        self.send(body.into_request()).await
    }

    /// Submit and return the accepted job id.
    pub async fn submit_ok(&self, prompt: &str) -> Uuid {
        let response = self.submit(prompt).await;
        assert_eq!(response.status(), 202);
        let json = json_body(response).await;
        json["job_id"].as_str().unwrap().parse().unwrap()
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: Uuid) -> JobStatus {
        for _ in 0..500 {
            let status = self.queue.status(id).unwrap().status;
            if status == JobStatus::Completed || status == JobStatus::Failed {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }
}

/// Hand-built multipart/form-data body.
#[derive(Default)]
pub struct MultipartBody {
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(data);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self) -> Request<Body> {
        self.bytes
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::post("/process-image")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, self.bytes.len())
            .body(Body::from(self.bytes))
            .unwrap()
    }
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Returns a fixed PNG, or a GPU out-of-memory error when the prompt is "oom".
pub struct StubExecutor;

#[async_trait]
impl InferenceExecutor for StubExecutor {
    async fn run(&self, input: JobInput) -> Result<Vec<u8>, ExecutionError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        if input.params.prompt == "oom" {
            return Err(ExecutionError::ResourceExhausted(
                "CUDA out of memory".to_string(),
            ));
        }
        Ok(GENERATED_PNG.to_vec())
    }
}
