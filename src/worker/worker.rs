use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing;

use crate::errors::{AppError, WorkerError};
use crate::models::ImageJob;
use crate::services::{task_registry, TaskRegistry};
use crate::worker::orchestrator::{remove_job_files, Orchestrator};

/// One submitted batch on its way to a worker.
#[derive(Debug)]
pub struct BatchRequest {
    pub task_id: String,
    pub jobs: Vec<ImageJob>,
    pub prompt: String,
    pub models: Vec<String>,
    pub cancel: CancellationToken,
}

pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<BatchRequest>>>;

/// Sending half of the bounded batch queue, cloned into the HTTP state.
#[derive(Clone)]
pub struct BatchQueue {
    sender: mpsc::Sender<BatchRequest>,
}

impl BatchQueue {
    pub fn channel(capacity: usize) -> (Self, SharedReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, Arc::new(Mutex::new(receiver)))
    }

    /// Enqueues without waiting; a full or closed queue is reported to the caller.
    pub fn submit(&self, request: BatchRequest) -> Result<(), AppError> {
        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(request) => {
                tracing::warn!("Batch queue full, rejecting task {}", request.task_id);
                AppError::Queue("too many batches waiting, try again later".into())
            }
            mpsc::error::TrySendError::Closed(request) => {
                tracing::error!("Batch queue closed, rejecting task {}", request.task_id);
                AppError::Queue("batch workers are not running".into())
            }
        })
    }
}

pub async fn worker_process(
    worker_id: usize,
    receiver: SharedReceiver,
    registry: Arc<TaskRegistry>,
    orchestrator: Arc<Orchestrator>,
) {
    tracing::info!("Worker {} started", worker_id);

    loop {
        // Hold the lock only while waiting for the next request
        let next = receiver.lock().await.recv().await;

        match next {
            Some(request) => {
                tracing::debug!("Worker {} picked up task {}", worker_id, request.task_id);
                process_request(&registry, &orchestrator, request).await;
            }
            None => {
                tracing::info!("Batch queue closed, worker {} stopping", worker_id);
                break;
            }
        }
    }
}

/// Runs one batch and records its outcome on the task.
pub async fn process_request(
    registry: &Arc<TaskRegistry>,
    orchestrator: &Arc<Orchestrator>,
    request: BatchRequest,
) {
    let task_id = request.task_id.clone();

    if !registry.mark_processing(&task_id) {
        tracing::error!("Task {} is not queued in the registry, dropping batch", task_id);
        remove_job_files(&request.jobs).await;
        return;
    }

    let cleanup_jobs = request.jobs.clone();

    // Spawn the batch in a separate task to catch panics
    let progress_registry = registry.clone();
    let orchestrator = orchestrator.clone();
    let handle = tokio::spawn(async move {
        let BatchRequest { task_id, jobs, prompt, models, cancel } = request;
        let label: String = task_id.chars().take(8).collect();
        orchestrator
            .run(&jobs, &prompt, &models, &label, &cancel, |done, rows, failed| {
                progress_registry.record_progress(&task_id, done, rows, failed);
            })
            .await
    });

    let result = match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Batch for task {} panicked: {}", task_id, e);
            // The orchestrator never reached its own cleanup
            let leftovers: Vec<ImageJob> = cleanup_jobs.into_iter().filter(|job| job.path.exists()).collect();
            remove_job_files(&leftovers).await;
            Err(WorkerError::TaskPanic(e.to_string()))
        }
    };

    match result {
        Ok(output) => {
            tracing::info!(
                "Task {} completed: {} rows, {} failed analyses, spreadsheet {}",
                task_id,
                output.rows.len(),
                output.failed_analyses,
                output.file.file_name
            );
            registry.complete(&task_id, output.file, output.rows, output.failed_analyses);
        }
        Err(e) => {
            tracing::error!("Task {} failed: {}", task_id, e);
            registry.fail(&task_id, e.to_string());
        }
    }
}

/// Periodically drops expired tasks and their spreadsheets.
pub async fn registry_sweeper(registry: Arc<TaskRegistry>, every: Duration) {
    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        let evicted = registry.evict_expired();
        if evicted.is_empty() {
            continue;
        }
        for task in &evicted {
            task_registry::discard_artifacts(task);
        }
        tracing::info!("Evicted {} expired tasks", evicted.len());
    }
}
