pub mod chat_client;
pub mod spreadsheet;
pub mod task_registry;
pub mod translator;
pub mod vision;

pub use chat_client::ChatClient;
pub use spreadsheet::{ExportedFile, SpreadsheetExporter};
pub use task_registry::{CancelOutcome, TaskRegistry};
pub use translator::{RemoteTranslator, Translator};
pub use vision::{RemoteVisionAnalyzer, VisionAnalyzer};
