use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::ResultRef;
use crate::services::inference::{ExecutionError, InferenceExecutor};
use crate::services::queue::{DequeuedJob, JobQueue};
use crate::services::storage::ResultStore;

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

/// The single consumer of the job queue.
///
/// Exactly one `Worker` may run per `JobQueue`; a second would break the
/// one-job-processing guarantee.
pub struct Worker {
    queue: Arc<JobQueue>,
    executor: Arc<dyn InferenceExecutor>,
    store: Arc<dyn ResultStore>,
}

impl Worker {
    pub fn new(
        queue: Arc<JobQueue>,
        executor: Arc<dyn InferenceExecutor>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            queue,
            executor,
            store,
        }
    }

    /// Process jobs until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed while idle; a running job is finished first.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Image generation worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.queue.dequeue_next() => job,
            };
            self.process(job).await;
        }
        tracing::info!("Image generation worker stopped");
    }

    /// Run one dequeued job to a terminal state.
    pub async fn process(&self, job: DequeuedJob) -> JobOutcome {
        let DequeuedJob { id, input } = job;
        tracing::info!(
            job_id = %id,
            prompt = %input.params.prompt,
            width = input.params.width,
            height = input.params.height,
            steps = input.params.num_inference_steps,
            guidance_scale = input.params.guidance_scale,
            true_cfg_scale = input.params.true_cfg_scale,
            seed = input.params.seed,
            "Processing job"
        );

        let start = Instant::now();
        let outcome = match self.execute(id, input).await {
            Ok(bytes) => self.store_result(id, bytes).await,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Job failed");
                Err(e.job_message())
            }
        };
        let elapsed = start.elapsed();
        metrics::histogram!("generation_processing_seconds").record(elapsed.as_secs_f64());

        match outcome {
            Ok(()) => {
                metrics::counter!("generation_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
                JobOutcome::Completed
            }
            Err(message) => {
                self.queue.mark_failed(id, message.clone());
                metrics::counter!("generation_jobs_failed_total").increment(1);
                JobOutcome::Failed(message)
            }
        }
    }

    /// Run the executor in its own task so a panic fails the job, not the worker.
    async fn execute(
        &self,
        id: Uuid,
        input: crate::models::job::JobInput,
    ) -> Result<Vec<u8>, ExecutionError> {
        let executor = self.executor.clone();
        match tokio::spawn(async move { executor.run(input).await }).await {
            Ok(result) => result,
            Err(join_error) => {
                tracing::error!(job_id = %id, error = %join_error, "Inference task panicked");
                Err(ExecutionError::Panicked(join_error.to_string()))
            }
        }
    }

    /// Store first, then mark completed, so a completed job always has bytes.
    async fn store_result(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), String> {
        match self.store.put(id, bytes).await {
            Ok(result_ref) => {
                self.queue.mark_completed(id, result_ref);
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to store job result");
                // Failed jobs carry no result_ref; the sweeper cannot reach a partial write.
                if let Err(cleanup) = self.store.delete(&ResultRef::for_job(id)).await {
                    tracing::warn!(job_id = %id, error = %cleanup, "Failed to remove partial result");
                }
                Err(format!("Failed to store generated image: {e}"))
            }
        }
    }
}
