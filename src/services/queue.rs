use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::job::{JobInput, JobRecord, JobStatus, ResultRef, StatusView};

/// A job handed to the worker by `dequeue_next`.
#[derive(Debug)]
pub struct DequeuedJob {
    pub id: Uuid,
    pub input: JobInput,
}

/// A terminal job whose TTL has run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredJob {
    pub id: Uuid,
    pub result_ref: Option<ResultRef>,
}

/// Point-in-time counts for health checks and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub capacity: usize,
}

/// Job map and FIFO, always locked together.
#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    jobs: HashMap<Uuid, JobRecord>,
}

/// Bounded in-memory job queue with admission control.
///
/// The queue is the sole owner of every `JobRecord`. Submitters and status
/// readers may call in from any task; `dequeue_next`, `mark_completed` and
/// `mark_failed` belong to the single worker.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_queue_size: usize,
}

impl JobQueue {
    pub fn new(max_queue_size: usize) -> Self {
        assert!(max_queue_size >= 1, "max_queue_size must be at least 1");
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_queue_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_queue_size
    }

    /// Admit a new job, or reject immediately when the queue is at capacity.
    pub fn submit(&self, input: JobInput) -> Result<Uuid, QueueError> {
        let record = JobRecord::new(input);
        let id = record.id;
        let depth = {
            let mut state = self.lock();
            if state.pending.len() >= self.max_queue_size {
                metrics::counter!("generation_jobs_rejected_total").increment(1);
                tracing::warn!(
                    queue_depth = state.pending.len(),
                    "Job queue is full, rejecting new request"
                );
                return Err(QueueError::RejectedFull {
                    capacity: self.max_queue_size,
                });
            }
            assert!(
                state.jobs.insert(id, record).is_none(),
                "job id {id} already in use"
            );
            state.pending.push_back(id);
            state.pending.len()
        };

        self.notify.notify_one();

        metrics::counter!("generation_jobs_submitted_total").increment(1);
        metrics::gauge!("generation_queue_depth").set(depth as f64);
        tracing::info!(job_id = %id, queue_depth = depth, "Job accepted and queued");
        Ok(id)
    }

    /// True when a submission right now would be rejected.
    pub fn is_full(&self) -> bool {
        self.lock().pending.len() >= self.max_queue_size
    }

    /// Status of a job, with its 1-based FIFO position while queued.
    pub fn status(&self, id: Uuid) -> Result<StatusView, QueueError> {
        let state = self.lock();
        let record = state.jobs.get(&id).ok_or(QueueError::NotFound(id))?;
        let queue_position = match record.status {
            JobStatus::Queued => Some(Self::position_of(&state.pending, id)),
            _ => None,
        };
        Ok(StatusView {
            id,
            status: record.status,
            queue_position,
            error: record.error.clone(),
        })
    }

    /// A copy of the full record, without its input payload.
    pub fn snapshot(&self, id: Uuid) -> Option<JobRecord> {
        self.lock().jobs.get(&id).map(|record| JobRecord {
            input: None,
            ..record.clone()
        })
    }

    /// Result handle of a completed job.
    ///
    /// Every other state, including unknown ids, is reported as unavailable.
    pub fn result_ref(&self, id: Uuid) -> Result<ResultRef, QueueError> {
        let state = self.lock();
        let record = state.jobs.get(&id).ok_or(QueueError::NotFound(id))?;
        match (&record.status, &record.result_ref) {
            (JobStatus::Completed, Some(result_ref)) => Ok(result_ref.clone()),
            (status, _) => Err(QueueError::ResultUnavailable { id, status: *status }),
        }
    }

    /// Pop the head of the FIFO and move it to `Processing`, if any.
    pub fn try_dequeue(&self) -> Option<DequeuedJob> {
        let mut state = self.lock();
        let id = state.pending.pop_front()?;
        let depth = state.pending.len();

        assert!(
            !state
                .jobs
                .values()
                .any(|job| job.status == JobStatus::Processing),
            "dequeue while another job is processing"
        );

        let record = match state.jobs.get_mut(&id) {
            Some(record) => record,
            None => panic!("queued job {id} missing from job map"),
        };
        let input = record.begin_processing(Utc::now());
        drop(state);

        metrics::gauge!("generation_queue_depth").set(depth as f64);
        Some(DequeuedJob { id, input })
    }

    /// Wait until a job is available and dequeue it.
    pub async fn dequeue_next(&self) -> DequeuedJob {
        loop {
            if let Some(job) = self.try_dequeue() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    /// Processing -> Completed. Panics if the job is not processing.
    pub fn mark_completed(&self, id: Uuid, result_ref: ResultRef) {
        let mut state = self.lock();
        match state.jobs.get_mut(&id) {
            Some(record) => record.complete(result_ref, Utc::now()),
            None => panic!("mark_completed on unknown job {id}"),
        }
    }

    /// Processing -> Failed. Panics if the job is not processing.
    pub fn mark_failed(&self, id: Uuid, error: impl Into<String>) {
        let mut state = self.lock();
        match state.jobs.get_mut(&id) {
            Some(record) => record.fail(error.into(), Utc::now()),
            None => panic!("mark_failed on unknown job {id}"),
        }
    }

    /// Remove a terminal job. Active or unknown ids are left alone.
    pub fn evict(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        match state.jobs.get(&id) {
            Some(record) if record.status.is_terminal() => {
                state.jobs.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Terminal jobs whose `finished_at` is more than `ttl` before `now`.
    pub fn expired(&self, now: DateTime<Utc>, ttl: ChronoDuration) -> Vec<ExpiredJob> {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.finished_at.is_some_and(|finished| now - finished > ttl))
            .map(|job| ExpiredJob {
                id: job.id,
                result_ref: job.result_ref.clone(),
            })
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let mut stats = QueueStats {
            queued: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            capacity: self.max_queue_size,
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Number of jobs currently tracked, in any state.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position_of(pending: &VecDeque<Uuid>, id: Uuid) -> usize {
        match pending.iter().position(|queued| *queued == id) {
            Some(index) => index + 1,
            None => panic!("queued job {id} missing from pending sequence"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock means an invariant already broke; keep failing loudly.
        self.state.lock().expect("job queue state poisoned")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is full (capacity {capacity})")]
    RejectedFull { capacity: usize },

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} has no result. Current status: {status}")]
    ResultUnavailable { id: Uuid, status: JobStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::generation::GenerationParams;
    use std::collections::HashSet;

    fn input() -> JobInput {
        JobInput {
            image: b"fake png".to_vec(),
            image_format: image::ImageFormat::Png,
            params: GenerationParams::default(),
        }
    }

    fn position(queue: &JobQueue, id: Uuid) -> Option<usize> {
        queue.status(id).unwrap().queue_position
    }

    #[test]
    fn test_submit_reports_fifo_positions() {
        let queue = JobQueue::new(2);
        let j1 = queue.submit(input()).unwrap();
        let j2 = queue.submit(input()).unwrap();

        assert_eq!(queue.status(j1).unwrap().status, JobStatus::Queued);
        assert_eq!(position(&queue, j1), Some(1));
        assert_eq!(position(&queue, j2), Some(2));

        let err = queue.submit(input()).unwrap_err();
        assert!(matches!(err, QueueError::RejectedFull { capacity: 2 }));

        let dequeued = queue.try_dequeue().unwrap();
        assert_eq!(dequeued.id, j1);
        let status = queue.status(j1).unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert_eq!(status.queue_position, None);
        assert_eq!(position(&queue, j2), Some(1));
    }

    #[test]
    fn test_rejected_submit_leaves_map_unchanged() {
        let queue = JobQueue::new(1);
        let only = queue.submit(input()).unwrap();
        let before = queue.len();

        assert!(queue.is_full());
        assert!(queue.submit(input()).is_err());
        assert_eq!(queue.len(), before);
        assert_eq!(position(&queue, only), Some(1));
    }

    #[test]
    fn test_processing_job_does_not_count_against_capacity() {
        let queue = JobQueue::new(1);
        queue.submit(input()).unwrap();
        queue.try_dequeue().unwrap();
        assert!(!queue.is_full());
        queue.submit(input()).unwrap();
        assert!(queue.is_full());
    }

    #[test]
    fn test_dequeue_order_is_fifo() {
        let queue = JobQueue::new(10);
        let ids: Vec<Uuid> = (0..5).map(|_| queue.submit(input()).unwrap()).collect();
        for window in ids.windows(2) {
            assert!(position(&queue, window[0]) < position(&queue, window[1]));
        }
        for expected in ids {
            let job = queue.try_dequeue().unwrap();
            assert_eq!(job.id, expected);
            queue.mark_completed(job.id, ResultRef::new(format!("{}.png", job.id)));
        }
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_dequeue_hands_over_input() {
        let queue = JobQueue::new(1);
        let id = queue.submit(input()).unwrap();
        let job = queue.try_dequeue().unwrap();
        assert_eq!(job.input.image, b"fake png".to_vec());
        assert!(queue.snapshot(id).unwrap().input.is_none());
        assert!(queue.snapshot(id).unwrap().started_at.is_some());
    }

    #[test]
    #[should_panic(expected = "another job is processing")]
    fn test_second_dequeue_while_processing_panics() {
        let queue = JobQueue::new(2);
        queue.submit(input()).unwrap();
        queue.submit(input()).unwrap();
        queue.try_dequeue().unwrap();
        queue.try_dequeue();
    }

    #[test]
    fn test_status_unknown_id() {
        let queue = JobQueue::new(1);
        let missing = Uuid::new_v4();
        assert!(matches!(queue.status(missing), Err(QueueError::NotFound(id)) if id == missing));
    }

    #[test]
    fn test_mark_completed_and_result_ref() {
        let queue = JobQueue::new(1);
        let id = queue.submit(input()).unwrap();
        assert!(matches!(
            queue.result_ref(id),
            Err(QueueError::ResultUnavailable { status: JobStatus::Queued, .. })
        ));

        queue.try_dequeue().unwrap();
        queue.mark_completed(id, ResultRef::new("done.png"));

        let record = queue.snapshot(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.finished_at.is_some());
        assert_eq!(queue.result_ref(id).unwrap(), ResultRef::new("done.png"));
    }

    #[test]
    fn test_failed_job_has_no_result() {
        let queue = JobQueue::new(1);
        let id = queue.submit(input()).unwrap();
        queue.try_dequeue().unwrap();
        queue.mark_failed(id, "CUDA OOM");

        let status = queue.status(id).unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error.as_deref(), Some("CUDA OOM"));
        assert!(matches!(
            queue.result_ref(id),
            Err(QueueError::ResultUnavailable { status: JobStatus::Failed, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "invalid transition")]
    fn test_mark_completed_on_queued_job_panics() {
        let queue = JobQueue::new(1);
        let id = queue.submit(input()).unwrap();
        queue.mark_completed(id, ResultRef::new("x.png"));
    }

    #[test]
    #[should_panic(expected = "unknown job")]
    fn test_mark_failed_on_unknown_job_panics() {
        let queue = JobQueue::new(1);
        queue.mark_failed(Uuid::new_v4(), "boom");
    }

    #[test]
    fn test_evict_only_terminal_and_idempotent() {
        let queue = JobQueue::new(2);
        let id = queue.submit(input()).unwrap();
        assert!(!queue.evict(id), "queued job must not be evicted");

        queue.try_dequeue().unwrap();
        assert!(!queue.evict(id), "processing job must not be evicted");

        queue.mark_completed(id, ResultRef::new("x.png"));
        assert!(queue.evict(id));
        assert!(!queue.evict(id));
        assert!(!queue.evict(Uuid::new_v4()));
        assert!(matches!(queue.status(id), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_expired_respects_ttl() {
        let queue = JobQueue::new(2);
        let done = queue.submit(input()).unwrap();
        let waiting = queue.submit(input()).unwrap();
        queue.try_dequeue().unwrap();
        queue.mark_completed(done, ResultRef::new("done.png"));

        let finished = queue.snapshot(done).unwrap().finished_at.unwrap();
        let ttl = ChronoDuration::seconds(600);

        assert!(queue.expired(finished + ttl, ttl).is_empty());
        let expired = queue.expired(finished + ttl + ChronoDuration::seconds(1), ttl);
        assert_eq!(
            expired,
            vec![ExpiredJob {
                id: done,
                result_ref: Some(ResultRef::new("done.png")),
            }]
        );
        assert!(!expired.iter().any(|job| job.id == waiting));
    }

    #[test]
    fn test_stats_counts_states() {
        let queue = JobQueue::new(3);
        let a = queue.submit(input()).unwrap();
        queue.submit(input()).unwrap();
        queue.try_dequeue().unwrap();
        queue.mark_failed(a, "x");
        queue.submit(input()).unwrap();
        queue.try_dequeue().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.capacity, 3);
    }

    #[test]
    fn test_ids_unique_across_many_submissions() {
        let queue = JobQueue::new(100_000);
        let mut seen = HashSet::with_capacity(100_000);
        for _ in 0..100_000 {
            let id = queue.submit(input()).unwrap();
            assert!(seen.insert(id), "duplicate id {id}");
        }
        assert_eq!(queue.len(), 100_000);
    }

    #[test]
    fn test_submit_wakes_idle_dequeue() {
        use tokio_test::{assert_pending, assert_ready};

        let queue = JobQueue::new(1);
        let mut next = tokio_test::task::spawn(queue.dequeue_next());
        assert_pending!(next.poll());

        let id = queue.submit(input()).unwrap();
        assert!(next.is_woken());
        let job = assert_ready!(next.poll());
        assert_eq!(job.id, id);
    }

    #[tokio::test]
    async fn test_dequeue_next_waits_for_submission() {
        let queue = std::sync::Arc::new(JobQueue::new(1));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_next().await.id })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let id = queue.submit(input()).unwrap();
        let dequeued = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("worker was not woken")
            .unwrap();
        assert_eq!(dequeued, id);
    }
}
