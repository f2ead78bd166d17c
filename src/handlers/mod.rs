mod task;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::state::AppState;

pub use task::{
    cancel_task, download_results, get_task_status, serve_result_page, serve_upload_page,
    upload_images,
};

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_request_size();

    Router::new()
        // Pages
        .route("/", get(serve_upload_page))
        .route("/result/:task_id", get(serve_result_page))

        // Batch routes
        .route("/upload", post(upload_images))
        .route("/api/status/:task_id", get(get_task_status))
        .route("/api/cancel/:task_id", post(cancel_task))
        .route("/download/:task_id", get(download_results))

        // File upload limits from config
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())

        .with_state(state)
}
