// Handler-facing error type plus the pipeline errors recorded on tasks.
use thiserror::Error;

pub mod response;
pub mod worker;

// Re-export commonly used types
pub use worker::{ExportError, ModelError, WorkerError, WorkerResult};

#[derive(Error, Debug)]
pub enum AppError {
    // Rejected uploads; nothing has been written or queued when this is returned.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Queue error: {0}")]
    Queue(String),
}

// Custom result type
pub type AppResult<T> = Result<T, AppError>;
