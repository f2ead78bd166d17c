use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

// Define task status enum
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Tasks only move forward: queued -> processing -> completed | failed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

/// One uploaded image waiting to be analyzed.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub path: PathBuf,
    pub stored_name: String,
    pub original_name: String,
}

/// One successful (image, model) analysis plus its translation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultRow {
    #[serde(rename = "original_filename")]
    pub image_name: String,
    #[serde(rename = "filename")]
    pub stored_name: String,
    pub model: String,
    pub analysis: String,
    #[serde(rename = "english_analysis")]
    pub translation: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskInfo {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<ResultRow>,
    pub failed_analyses: usize,
    pub error: Option<String>,
    pub excel_file: Option<String>,
    #[serde(skip)]
    pub excel_path: Option<PathBuf>,
    pub models: Vec<String>,
    pub submission_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn new(task_id: String, total: usize, models: Vec<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            progress: 0,
            total,
            results: Vec::new(),
            failed_analyses: 0,
            error: None,
            excel_file: None,
            excel_path: None,
            models,
            submission_time: Utc::now(),
            completion_time: None,
        }
    }
}

/// Body of `GET /api/status/:task_id`.
#[derive(Serialize, Debug)]
pub struct TaskStatusResponse {
    pub status: TaskStatus,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<ResultRow>,
    pub error: String,
    pub excel_file: String,
    pub failed_analyses: usize,
}

impl From<TaskInfo> for TaskStatusResponse {
    fn from(task: TaskInfo) -> Self {
        Self {
            status: task.status,
            progress: task.progress,
            total: task.total,
            results: task.results,
            error: task.error.unwrap_or_default(),
            excel_file: task.excel_file.unwrap_or_default(),
            failed_analyses: task.failed_analyses,
        }
    }
}
