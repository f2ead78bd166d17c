pub mod orchestrator;
mod worker;

pub use orchestrator::Orchestrator;
pub use worker::{registry_sweeper, worker_process, BatchQueue, BatchRequest};
