use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobStatus, StatusView};

/// Response after a job has been accepted into the queue.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    pub job_id: Uuid,
    pub status_url: String,
    pub result_url: String,
}

impl SubmitResponse {
    pub fn accepted(job_id: Uuid) -> Self {
        Self {
            message: "Request accepted and queued.".to_string(),
            job_id,
            status_url: format!("/status/{job_id}"),
            result_url: format!("/result/{job_id}"),
        }
    }
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<StatusView> for JobStatusResponse {
    fn from(view: StatusView) -> Self {
        Self {
            job_id: view.id,
            status: view.status,
            queue_position: view.queue_position,
            error: view.error,
        }
    }
}

/// JSON body returned with every error status.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
