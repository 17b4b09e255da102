use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::generation::GenerationParams;

/// Status of an image generation job in the in-memory queue.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` are terminal; only terminal jobs may be evicted.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal transitions: Queued -> Processing -> {Completed, Failed}.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Handle to a stored artifact, usable against a `ResultStore`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key every store uses for a job's generated image.
    pub fn for_job(id: Uuid) -> Self {
        Self(format!("{id}.png"))
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the inference backend needs to run one job.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub image: Vec<u8>,
    pub image_format: image::ImageFormat,
    pub params: GenerationParams,
}

/// One unit of work and its lifecycle state.
///
/// Records are owned by the `JobQueue`; callers only ever see clones.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Taken by the worker on dequeue, `None` afterwards.
    pub input: Option<JobInput>,
    pub error: Option<String>,
    pub result_ref: Option<ResultRef>,
}

impl JobRecord {
    pub fn new(input: JobInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            input: Some(input),
            error: None,
            result_ref: None,
        }
    }

    /// Queued -> Processing. Hands the input over to the caller.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> JobInput {
        self.transition(JobStatus::Processing);
        self.started_at = Some(now);
        match self.input.take() {
            Some(input) => input,
            None => panic!("job {} entered processing without input", self.id),
        }
    }

    /// Processing -> Completed.
    pub fn complete(&mut self, result_ref: ResultRef, now: DateTime<Utc>) {
        self.transition(JobStatus::Completed);
        self.finished_at = Some(now);
        self.result_ref = Some(result_ref);
    }

    /// Processing -> Failed.
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.transition(JobStatus::Failed);
        self.finished_at = Some(now);
        self.error = Some(error);
    }

    fn transition(&mut self, next: JobStatus) {
        assert!(
            self.status.can_transition_to(next),
            "invalid transition for job {}: {} -> {}",
            self.id,
            self.status,
            next
        );
        self.status = next;
    }
}

/// What a status lookup returns to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub id: Uuid,
    pub status: JobStatus,
    /// 1-based position among queued jobs, only while `Queued`.
    pub queue_position: Option<usize>,
    pub error: Option<String>,
}
