use thiserror::Error;
use std::io;

/// Failure of a single chat-completion call made by the analyzer or the translator.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response contained no choices")]
    EmptyChoices,

    #[error("model returned empty content")]
    EmptyContent,

    #[error("unrecognized content shape: {0}")]
    UnrecognizedContent(String),

    #[error("model {0} is not in the allow-list")]
    UnknownModel(String),

    #[error("failed to read image {path}: {source}")]
    ImageRead {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("spreadsheet writer error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Batch-level outcome recorded into a task's `error` field.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("all images failed analysis")]
    AllAnalysesFailed,

    #[error("failed to export spreadsheet: {0}")]
    Export(#[from] ExportError),

    #[error("cancelled by user")]
    Cancelled,

    #[error("batch panicked: {0}")]
    TaskPanic(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
