use axum::{
    extract::{Multipart, State, Path, multipart::{Field, MultipartError}},
    response::{Html, IntoResponse, Response, Json, Redirect},
    http::{StatusCode, header},
    body::Body,
};
use bytes::{Bytes, BytesMut};
use chrono::Local;
use serde_json::json;
use std::path::{Path as FilePath, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncWriteExt, BufReader},
};
use tokio_util::io::ReaderStream;
use tracing;

use crate::config::{Config, UploadConfig};
use crate::errors::{AppError, AppResult};
use crate::models::{ImageJob, TaskStatusResponse, UploadForm};
use crate::services::CancelOutcome;
use crate::state::AppState;
use crate::worker::{orchestrator::remove_job_files, BatchRequest};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// One image pulled out of the multipart body, still in memory
struct UploadedImage {
    original_name: String,
    data: Bytes,
}

// Helper struct to hold form data during file upload processing
struct UploadData {
    files: Vec<UploadedImage>,
    form: UploadForm,
}

pub async fn serve_upload_page() -> AppResult<Response> {
    tracing::info!("Serving upload page");

    let upload_html = tokio::fs::read_to_string("templates/index.html")
        .await
        .map_err(|e| {
            tracing::error!("Failed to read upload template: {}", e);
            AppError::File(e)
        })?;

    Ok(Html(upload_html).into_response())
}

pub async fn serve_result_page(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    if state.registry.get(&task_id).is_none() {
        tracing::warn!("Result page requested for unknown task: {}", task_id);
        return Err(AppError::NotFound("Task not found".into()));
    }

    let template = tokio::fs::read_to_string("templates/result.html")
        .await
        .map_err(AppError::File)?;

    Ok(Html(template.replace("{{task_id}}", &task_id)).into_response())
}

pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    // Everything is validated before a single byte reaches the disk
    let upload = process_multipart_form(&mut multipart, &state.config.upload).await?;
    let (prompt, models) = resolve_form(&upload.form, &state.config)?;

    let (task_id, cancel) = state.registry.create(upload.files.len(), models.clone());
    let jobs = match store_images(&upload.files, &task_id, &state.config.upload.upload_dir).await {
        Ok(jobs) => jobs,
        Err(e) => {
            state.registry.remove(&task_id);
            return Err(e);
        }
    };

    let request = BatchRequest {
        task_id: task_id.clone(),
        jobs: jobs.clone(),
        prompt,
        models,
        cancel,
    };

    if let Err(e) = state.queue.submit(request) {
        state.registry.remove(&task_id);
        remove_job_files(&jobs).await;
        return Err(e);
    }

    tracing::info!("Queued task {} with {} images", task_id, jobs.len());
    Ok(Redirect::to(&format!("/result/{}", task_id)).into_response())
}

pub async fn get_task_status(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<TaskStatusResponse>> {
    tracing::debug!("Checking status for task: {}", task_id);

    let task = state.registry.get(&task_id).ok_or_else(|| {
        tracing::warn!("Task not found: {}", task_id);
        AppError::NotFound("Task not found".into())
    })?;

    tracing::trace!("Task {} status: {:?} ({}/{})", task_id, task.status, task.progress, task.total);
    Ok(Json(TaskStatusResponse::from(task)))
}

pub async fn download_results(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    tracing::info!("Starting download for task_id: {}", task_id);

    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

    let (file_name, path) = match (task.excel_file, task.excel_path) {
        (Some(name), Some(path)) => (name, path),
        _ => {
            tracing::warn!("Task {} has no spreadsheet ({:?})", task_id, task.status);
            return Err(AppError::NotFound("Spreadsheet not available".into()));
        }
    };

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!("Spreadsheet missing on disk: {}", path.display());
            return Err(AppError::NotFound("Spreadsheet file has been removed".into()));
        }
        Err(e) => return Err(AppError::File(e)),
    };
    let file_size = file.metadata().await?.len();

    // Create buffered reader and stream
    let stream = ReaderStream::new(BufReader::new(file));
    let body = Body::from_stream(stream);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, XLSX_CONTENT_TYPE)
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name))
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .body(body)
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            AppError::Task(format!("Failed to build download response: {}", e))
        })?;

    tracing::info!("Streaming {} ({} bytes) for task {}", file_name, file_size, task_id);
    Ok(response)
}

pub async fn cancel_task(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    match state.registry.cancel(&task_id) {
        CancelOutcome::Cancelled => {
            Ok(Json(json!({ "task_id": task_id, "cancelled": true })).into_response())
        }
        CancelOutcome::AlreadyFinished => {
            Err(AppError::Task(format!("Task {} has already finished", task_id)))
        }
        CancelOutcome::NotFound => Err(AppError::NotFound("Task not found".into())),
    }
}

// Helper function to process multipart form data from file upload
// Collects images in memory and rejects the first file that breaks a limit
async fn process_multipart_form(
    multipart: &mut Multipart,
    limits: &UploadConfig,
) -> AppResult<UploadData> {
    let mut data = UploadData {
        files: Vec::new(),
        form: UploadForm::default(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        match field.name().unwrap_or("") {
            "files" => {
                let has_file = field.file_name().is_some_and(|name| !name.is_empty());
                if has_file && data.files.len() >= limits.max_files {
                    tracing::warn!("Upload exceeds {} files", limits.max_files);
                    return Err(AppError::Validation(format!(
                        "At most {} images can be uploaded at once",
                        limits.max_files
                    )));
                }
                let Some(image) = read_image_field(field, limits).await? else {
                    continue;
                };
                tracing::debug!("Received image {} ({} bytes)", image.original_name, image.data.len());
                data.files.push(image);
            }
            "prompt" => {
                data.form.prompt = read_text_field(field, limits).await?;
            }
            "models" => {
                data.form.models.push(read_text_field(field, limits).await?);
            }
            field_name => {
                tracing::warn!("Unexpected form field: {}", field_name);
            }
        }
    }

    if data.files.is_empty() {
        return Err(AppError::Validation("No image files were selected".into()));
    }

    Ok(data)
}

// Reads one file part. Browsers send an empty part when no file was chosen.
async fn read_image_field(
    mut field: Field<'_>,
    limits: &UploadConfig,
) -> AppResult<Option<UploadedImage>> {
    let original_name = field.file_name().unwrap_or("").to_string();
    if original_name.is_empty() {
        return Ok(None);
    }

    if !is_allowed_extension(&original_name, &limits.allowed_extensions) {
        return Err(AppError::Validation(format!(
            "File \"{}\" is not a supported image type (allowed: {})",
            original_name,
            limits.allowed_extensions.join(", ")
        )));
    }

    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return multipart_error(e, limits);
        }
        AppError::Validation(format!("Failed to read \"{}\": {}", original_name, e))
    })? {
        if buffer.len() + chunk.len() > limits.max_file_size {
            return Err(AppError::Validation(format!(
                "File \"{}\" is too large, images must be smaller than {}MB",
                original_name,
                limits.max_file_size / (1024 * 1024)
            )));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(Some(UploadedImage {
        original_name,
        data: buffer.freeze(),
    }))
}

async fn read_text_field(field: Field<'_>, limits: &UploadConfig) -> AppResult<String> {
    field.text().await.map_err(|e| multipart_error(e, limits))
}

// A tripped body limit surfaces as a multipart error; name the limits instead.
fn multipart_error(e: MultipartError, limits: &UploadConfig) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!("Upload body exceeded the request limit: {}", e);
        return AppError::Validation(format!(
            "Upload is too large, send at most {} images of up to {}MB each",
            limits.max_files,
            limits.max_file_size / (1024 * 1024)
        ));
    }
    tracing::error!("Failed to read multipart form: {}", e);
    AppError::Validation(format!("Failed to process form field: {}", e))
}

// Applies defaults and checks every requested model against the allow-list
fn resolve_form(form: &UploadForm, config: &Config) -> AppResult<(String, Vec<String>)> {
    let models = form.effective_models(&config.analysis.default_models);
    if let Some(unknown) = models
        .iter()
        .find(|model| !config.analysis.allowed_models.contains(model))
    {
        return Err(AppError::Validation(format!("Unknown model \"{}\"", unknown)));
    }

    Ok((form.effective_prompt(&config.analysis.default_prompt), models))
}

// Helper function to save validated images under names unique to the task.
// Files are created with `create_new`, so an existing upload is never overwritten.
async fn store_images(
    files: &[UploadedImage],
    task_id: &str,
    upload_dir: &str,
) -> AppResult<Vec<ImageJob>> {
    tokio::fs::create_dir_all(upload_dir).await.map_err(|e| {
        tracing::error!("Failed to create upload directory {}: {}", upload_dir, e);
        AppError::File(e)
    })?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut jobs = Vec::with_capacity(files.len());

    for (index, file) in files.iter().enumerate() {
        let stored_name = format!(
            "{}_{}_{:02}_{}",
            timestamp,
            task_id,
            index + 1,
            sanitize_filename(&file.original_name)
        );
        let path = PathBuf::from(upload_dir).join(&stored_name);

        if let Err(e) = write_new_file(&path, &file.data).await {
            tracing::error!("Failed to save {}: {}", path.display(), e);
            remove_job_files(&jobs).await;
            return Err(AppError::File(e));
        }

        jobs.push(ImageJob {
            path,
            stored_name,
            original_name: file.original_name.clone(),
        });
    }

    tracing::debug!("Stored {} images in {}", jobs.len(), upload_dir);
    Ok(jobs)
}

async fn write_new_file(path: &FilePath, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path).await?;
    let mut written = file.write_all(data).await;
    if written.is_ok() {
        written = file.flush().await;
    }
    if written.is_err() {
        // the file is ours, don't leave half an image behind
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}

fn is_allowed_extension(filename: &str, allowed: &[String]) -> bool {
    FilePath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

// Keeps only characters that are safe in a file name on any platform
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    let stem = FilePath::new(&cleaned)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if stem.trim_matches('_').is_empty() {
        let ext = FilePath::new(&cleaned)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("img");
        return format!("image.{}", ext);
    }
    cleaned
}
