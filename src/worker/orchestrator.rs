use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing;

use crate::errors::{ModelError, WorkerError, WorkerResult};
use crate::models::{ImageJob, ResultRow};
use crate::services::{ExportedFile, SpreadsheetExporter, Translator, VisionAnalyzer};

/// Everything a finished batch hands back to the registry.
#[derive(Debug)]
pub struct BatchOutput {
    pub file: ExportedFile,
    pub rows: Vec<ResultRow>,
    pub failed_analyses: usize,
}

/// Runs one batch: every image through every requested model, one call at a time.
pub struct Orchestrator {
    analyzer: Arc<dyn VisionAnalyzer>,
    translator: Arc<dyn Translator>,
    exporter: SpreadsheetExporter,
    translation_placeholder: String,
}

impl Orchestrator {
    pub fn new(
        analyzer: Arc<dyn VisionAnalyzer>,
        translator: Arc<dyn Translator>,
        exporter: SpreadsheetExporter,
        translation_placeholder: impl Into<String>,
    ) -> Self {
        Self {
            analyzer,
            translator,
            exporter,
            translation_placeholder: translation_placeholder.into(),
        }
    }

    /// Analyzes and translates, then exports the rows.
    ///
    /// `on_progress(jobs_completed, rows_so_far, failed_analyses)` fires after each
    /// image has been through all models. A failed analysis is skipped, a failed
    /// translation keeps its row with a placeholder. Each job's file is removed
    /// once the batch stops, whatever the outcome.
    pub async fn run<F>(
        &self,
        jobs: &[ImageJob],
        prompt: &str,
        models: &[String],
        label: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> WorkerResult<BatchOutput>
    where
        F: FnMut(usize, &[ResultRow], usize) + Send,
    {
        let outcome = self
            .analyze_all(jobs, prompt, models, cancel, &mut on_progress)
            .await;
        remove_job_files(jobs).await;

        let (rows, failed_analyses) = outcome?;
        if rows.is_empty() {
            tracing::error!("No analysis succeeded for {} images", jobs.len());
            return Err(WorkerError::AllAnalysesFailed);
        }

        // Workbook writing is blocking file I/O
        let exporter = self.exporter.clone();
        let label = label.to_string();
        let (file, rows) = tokio::task::spawn_blocking(move || {
            exporter.export(&rows, &label).map(|file| (file, rows))
        })
        .await
        .map_err(|e| WorkerError::TaskPanic(e.to_string()))??;

        Ok(BatchOutput {
            file,
            rows,
            failed_analyses,
        })
    }

    async fn analyze_all<F>(
        &self,
        jobs: &[ImageJob],
        prompt: &str,
        models: &[String],
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> WorkerResult<(Vec<ResultRow>, usize)>
    where
        F: FnMut(usize, &[ResultRow], usize) + Send,
    {
        let mut rows = Vec::new();
        let mut failed_analyses = 0;

        for (index, job) in jobs.iter().enumerate() {
            tracing::info!("Analyzing image {}/{}: {}", index + 1, jobs.len(), job.original_name);

            for model in models {
                let analysis = until_cancelled(
                    cancel,
                    self.analyzer.analyze(&job.path, prompt, model),
                )
                .await?;

                let analysis = match analysis {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(
                            "Analysis of {} with {} failed: {}",
                            job.original_name,
                            model,
                            e
                        );
                        failed_analyses += 1;
                        continue;
                    }
                };

                let translation = match until_cancelled(cancel, self.translator.translate(&analysis)).await? {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(
                            "Translation for {} with {} failed: {}",
                            job.original_name,
                            model,
                            e
                        );
                        self.placeholder_for(&e)
                    }
                };

                tracing::debug!("Model {} finished {}", model, job.original_name);
                rows.push(ResultRow {
                    image_name: job.original_name.clone(),
                    stored_name: job.stored_name.clone(),
                    model: model.clone(),
                    analysis,
                    translation,
                });
            }

            on_progress(index + 1, &rows, failed_analyses);
        }

        Ok((rows, failed_analyses))
    }

    fn placeholder_for(&self, error: &ModelError) -> String {
        format!("{}: {}", self.translation_placeholder, error)
    }
}

// Races a model call against the batch's cancellation token.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = T>,
) -> WorkerResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WorkerError::Cancelled),
        value = call => Ok(value),
    }
}

/// Best-effort removal of uploaded images; errors are logged, never surfaced.
pub async fn remove_job_files(jobs: &[ImageJob]) {
    for job in jobs {
        match tokio::fs::remove_file(&job.path).await {
            Ok(()) => tracing::debug!("Removed uploaded image {}", job.path.display()),
            Err(e) => tracing::warn!("Failed to remove {}: {}", job.path.display(), e),
        }
    }
}
