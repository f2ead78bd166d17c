use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::RegistryConfig;
use crate::models::{ResultRow, TaskInfo, TaskStatus};
use crate::services::spreadsheet::ExportedFile;

struct TaskEntry {
    info: TaskInfo,
    cancel: CancellationToken,
}

/// Outcome of a cancellation request.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyFinished,
    NotFound,
}

/// Process-wide, in-memory store of batch tasks.
///
/// Readers get cloned snapshots; every mutation happens under the write lock,
/// so a poll never observes a half-updated task. Queued and processing tasks
/// are never evicted.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    completed_ttl: Duration,
    max_tasks: usize,
}

impl TaskRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            completed_ttl: Duration::seconds(config.completed_ttl_secs as i64),
            max_tasks: config.max_tasks.max(1),
        }
    }

    /// Registers a new queued task and returns its id with its cancellation token.
    pub fn create(&self, total: usize, models: Vec<String>) -> (String, CancellationToken) {
        let task_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let evicted = {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            let evicted = if tasks.len() >= self.max_tasks {
                let evicted = evict_oldest_finished(&mut tasks);
                if evicted.is_none() {
                    tracing::warn!(
                        "Registry holds {} unfinished tasks, growing past max_tasks",
                        tasks.len()
                    );
                }
                evicted
            } else {
                None
            };

            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    info: TaskInfo::new(task_id.clone(), total, models),
                    cancel: cancel.clone(),
                },
            );
            evicted
        };

        // File removal happens outside the lock
        if let Some(evicted) = evicted {
            tracing::info!("Registry full, evicted task {}", evicted.task_id);
            discard_artifacts(&evicted);
        }

        tracing::debug!("Created task {} with {} images", task_id, total);
        (task_id, cancel)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskInfo> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task_id).map(|entry| entry.info.clone())
    }

    /// Drops a task outright, used when a batch could not be queued.
    pub fn remove(&self, task_id: &str) -> Option<TaskInfo> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        tasks.remove(task_id).map(|entry| entry.info)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Applies `mutator` to the task under the write lock. Returns `false` for unknown ids.
    /// Progress is clamped to `total` afterwards.
    pub fn update<F>(&self, task_id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut TaskInfo),
    {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(task_id) {
            Some(entry) => {
                mutator(&mut entry.info);
                entry.info.progress = entry.info.progress.min(entry.info.total);
                true
            }
            None => false,
        }
    }

    pub fn mark_processing(&self, task_id: &str) -> bool {
        self.transition(task_id, TaskStatus::Processing, |_| {})
    }

    /// Publishes intermediate results. Progress never moves backwards.
    pub fn record_progress(
        &self,
        task_id: &str,
        jobs_completed: usize,
        rows: &[ResultRow],
        failed_analyses: usize,
    ) -> bool {
        let mut applied = false;
        self.update(task_id, |task| {
            if task.status != TaskStatus::Processing {
                return;
            }
            task.progress = task.progress.max(jobs_completed.min(task.total));
            task.results = rows.to_vec();
            task.failed_analyses = failed_analyses;
            applied = true;
        });
        applied
    }

    pub fn complete(
        &self,
        task_id: &str,
        file: ExportedFile,
        rows: Vec<ResultRow>,
        failed_analyses: usize,
    ) -> bool {
        self.transition(task_id, TaskStatus::Completed, move |task| {
            task.progress = task.total;
            task.results = rows;
            task.failed_analyses = failed_analyses;
            task.excel_file = Some(file.file_name);
            task.excel_path = Some(file.path);
        })
    }

    pub fn fail(&self, task_id: &str, error: String) -> bool {
        self.transition(task_id, TaskStatus::Failed, move |task| {
            task.error = Some(error);
        })
    }

    pub fn cancel(&self, task_id: &str) -> CancelOutcome {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        match tasks.get(task_id) {
            None => CancelOutcome::NotFound,
            Some(entry) if entry.info.status.is_finished() => CancelOutcome::AlreadyFinished,
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!("Cancellation requested for task {}", task_id);
                CancelOutcome::Cancelled
            }
        }
    }

    /// Removes finished tasks older than the configured TTL and returns them.
    pub fn evict_expired(&self) -> Vec<TaskInfo> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<String> = tasks
            .iter()
            .filter(|(_, entry)| {
                entry
                    .info
                    .completion_time
                    .is_some_and(|done| now - done >= self.completed_ttl)
            })
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| tasks.remove(id))
            .map(|entry| entry.info)
            .collect()
    }

    fn transition<F>(&self, task_id: &str, next: TaskStatus, apply: F) -> bool
    where
        F: FnOnce(&mut TaskInfo),
    {
        let mut moved = false;
        self.update(task_id, |task| {
            if !task.status.can_transition_to(next) {
                tracing::warn!(
                    "Refusing to move task {} from {:?} to {:?}",
                    task.task_id,
                    task.status,
                    next
                );
                return;
            }
            tracing::debug!("Task {} status {:?} -> {:?}", task.task_id, task.status, next);
            task.status = next;
            if next.is_finished() {
                task.completion_time = Some(Utc::now());
            }
            apply(task);
            moved = true;
        });
        moved
    }
}

fn evict_oldest_finished(tasks: &mut HashMap<String, TaskEntry>) -> Option<TaskInfo> {
    let oldest = tasks
        .iter()
        .filter_map(|(id, entry)| entry.info.completion_time.map(|done| (id.clone(), done)))
        .min_by_key(|(_, done)| *done)
        .map(|(id, _)| id)?;
    tasks.remove(&oldest).map(|entry| entry.info)
}

/// Best-effort removal of a task's spreadsheet once the task is gone.
pub fn discard_artifacts(task: &TaskInfo) {
    if let Some(path) = &task.excel_path {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove spreadsheet {}: {}", path.display(), e);
        }
    }
}
