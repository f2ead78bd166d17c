// Application state that can be shared between handlers
use std::sync::Arc;

use crate::config::Config;
use crate::services::TaskRegistry;
use crate::worker::BatchQueue;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    pub queue: BatchQueue,
    pub config: Arc<Config>,
}
