pub mod health;
pub mod jobs;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::error::ApiError;

/// Job API and health routes with the standard middleware stack.
///
/// `/metrics` is mounted separately by the binary since it needs the
/// Prometheus recorder handle.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/process-image", post(jobs::submit_job))
        .route("/status/{job_id}", get(jobs::get_job_status))
        .route("/result/{job_id}", get(jobs::get_job_result))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(middleware::map_response(json_payload_too_large))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

async fn not_found() -> ApiError {
    ApiError::NotFound("The requested URL was not found on the server.".to_string())
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// The body limit layer rejects on `Content-Length` with a plain-text 413
/// before any handler runs; give those the same JSON body as other errors.
async fn json_payload_too_large(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return ApiError::upload_too_large().into_response();
    }
    response
}
