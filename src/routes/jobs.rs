use std::collections::HashMap;
use std::io::Cursor;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use image::ImageFormat;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::api::{JobStatusResponse, SubmitResponse};
use crate::models::generation::{is_allowed_file, GenerationParams, ALLOWED_EXTENSIONS};
use crate::models::job::JobInput;

const ALLOWED_FORMATS: &[ImageFormat] = &[ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

/// POST /process-image — Upload an image and generation parameters.
///
/// Returns 202 with the job id, or 503 when the queue is full.
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    // Cheap early rejection; `submit` below is the authoritative check.
    if state.queue.is_full() {
        metrics::counter!("generation_jobs_rejected_total").increment(1);
        tracing::warn!("Job queue is full, rejecting new request before upload parsing");
        return Err(ApiError::QueueFull);
    }

    let input = read_job_input(multipart).await.inspect_err(|e| {
        tracing::warn!(error = %e, "Bad submit request");
    })?;

    let job_id = state.queue.submit(input)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::accepted(job_id))))
}

/// GET /status/{job_id} — Poll a job's status and queue position.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let view = state.queue.status(job_id)?;
    tracing::debug!(job_id = %job_id, status = %view.status, "Status poll");
    Ok(Json(view.into()))
}

/// GET /result/{job_id} — Download the generated PNG of a completed job.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let result_ref = state.queue.result_ref(job_id)?;

    let bytes = state
        .store
        .get(&result_ref)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read result: {e}")))?
        .ok_or_else(|| ApiError::Internal("Result for this job is missing.".to_string()))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

/// Malformed ids are reported exactly like unknown ones.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Job ID not found.".to_string()))
}

async fn read_job_input(mut multipart: Multipart) -> Result<JobInput, ApiError> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut form = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(multipart_error)?;
            image = Some((filename, data.to_vec()));
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.insert(name, value);
        }
    }

    let (filename, data) =
        image.ok_or_else(|| ApiError::BadRequest("No 'image' file part in the request.".to_string()))?;
    if !is_allowed_file(&filename) {
        return Err(ApiError::BadRequest(format!(
            "Invalid or no image file provided. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    let image_format = validate_image(&data)?;

    let params =
        GenerationParams::from_form(&form).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(JobInput {
        image: data,
        image_format,
        params,
    })
}

/// Check that the bytes carry a readable header in an accepted format.
fn validate_image(data: &[u8]) -> Result<ImageFormat, ApiError> {
    let invalid = || ApiError::BadRequest("The uploaded file is not a valid image.".to_string());

    let format = image::guess_format(data).map_err(|_| invalid())?;
    if !ALLOWED_FORMATS.contains(&format) {
        return Err(invalid());
    }
    image::ImageReader::with_format(Cursor::new(data), format)
        .into_dimensions()
        .map_err(|_| invalid())?;
    Ok(format)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::upload_too_large()
    } else {
        ApiError::BadRequest(format!("Malformed upload: {}", err.body_text()))
    }
}
