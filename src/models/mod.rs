mod forms;
mod task;

pub use forms::UploadForm;
pub use task::{ImageJob, ResultRow, TaskInfo, TaskStatus, TaskStatusResponse};
