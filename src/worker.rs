//! The download worker pool (C11): pops queued jobs off the `Scheduler`,
//! drives them through metadata lookup, template rendering, and the
//! retrying extractor invocation, and records the outcome in the
//! `JobStore`.

use crate::cookies::ValidationResult;
use crate::error::ServiceError;
use crate::extractor::retry::execute_with_retry;
use crate::extractor::Invoker;
use crate::models::{Job, JobState, TemplateContext};
use crate::state::AppState;
use crate::template::ValidatedTemplate;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Spawns `concurrency` independent worker loops, each competing for jobs
/// through the scheduler's shared semaphore. Every loop holds its own clone
/// of `shutdown` and stops popping new work once it fires.
pub fn spawn_worker_pool(
    state: AppState,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..concurrency)
        .map(|worker_index| {
            let state = state.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(worker_index, "download worker started");
                loop {
                    let mut shutdown_wait = shutdown.clone();
                    let wait_for_shutdown = async move {
                        let _ = shutdown_wait.changed().await;
                    };
                    let popped = state.scheduler.clone().acquire_and_pop(wait_for_shutdown).await;
                    let Some((permit, job_id)) = popped else {
                        info!(worker_index, "download worker shutting down");
                        return;
                    };
                    if *shutdown.borrow() {
                        info!(worker_index, "download worker shutting down");
                        return;
                    }
                    process_job(&state, &job_id).await;
                    drop(permit);
                }
            })
        })
        .collect()
}

#[instrument(skip(state))]
async fn process_job(state: &AppState, job_id: &str) {
    let Some(job) = state.job_store.get(job_id).await else {
        warn!(job_id, "worker popped a job that no longer exists");
        return;
    };

    state
        .job_store
        .update(job_id, |j| {
            j.state = JobState::Processing;
            j.started_at = Some(chrono::Utc::now());
        })
        .await;

    match run_job(state, &job).await {
        Ok((file_path, file_size_bytes)) => {
            if let Some(relative) = relative_output_path(state, &file_path) {
                state.job_store.unmark_active_file(&relative).await;
            }
            state
                .job_store
                .update(job_id, |j| {
                    j.state = JobState::Completed;
                    j.progress = 100;
                    j.file_path = Some(file_path.display().to_string());
                    j.file_size_bytes = Some(file_size_bytes);
                    j.completed_at = Some(chrono::Utc::now());
                })
                .await;
        }
        Err((err, reserved_path)) => {
            if let Some(relative) = reserved_path.and_then(|p| relative_output_path(state, &p)) {
                state.job_store.unmark_active_file(&relative).await;
            }
            error!(job_id, error = %err, "job failed");
            state
                .job_store
                .update(job_id, |j| {
                    j.state = JobState::Failed;
                    j.error_code = Some(err.error_code().to_string());
                    j.error_message = Some(err.to_string());
                    j.completed_at = Some(chrono::Utc::now());
                })
                .await;
        }
    }
}

/// Runs one job end to end. On failure, the second tuple element carries
/// the reserved output path (if one was claimed before the failure) so the
/// caller can release it from the active-file set.
async fn run_job(
    state: &AppState,
    job: &Job,
) -> Result<(std::path::PathBuf, u64), (ServiceError, Option<std::path::PathBuf>)> {
    let provider = {
        let dispatcher = state.dispatcher.lock().await;
        dispatcher
            .select(&job.url, &state.config.providers)
            .map_err(|e| (e, None))?
            .clone()
    };

    if provider.cookie_path.is_some() {
        if let Some(record) = state.cookie_store.snapshot(&provider.name).await {
            if record.validation_result == ValidationResult::Invalid {
                return Err((ServiceError::CookieExpired, None));
            }
        }
    }

    let metadata_timeout = Duration::from_secs(state.config.timeouts.metadata_attempt_secs);
    let metadata = state
        .invoker
        .fetch_metadata(&job.url, &provider, metadata_timeout)
        .await
        .map_err(|e| (e, None))?;

    let context = TemplateContext {
        title: metadata.title.clone().unwrap_or_else(|| "untitled".to_string()),
        id: metadata.id.clone().unwrap_or_else(|| "unknown".to_string()),
        ext: job
            .params
            .audio_format
            .clone()
            .unwrap_or_else(|| "mp4".to_string()),
        upload_date: metadata.upload_date.clone().unwrap_or_default(),
        uploader: metadata.uploader.clone().unwrap_or_default(),
        resolution: String::new(),
        format_id: job.params.format_id.clone().unwrap_or_default(),
    };

    let template_raw = job
        .params
        .output_template
        .clone()
        .unwrap_or_else(|| state.config.templates.default_template.clone());
    let template = ValidatedTemplate::parse(&template_raw).map_err(|e| (e, None))?;

    let output_dir = state.config.storage.output_dir.clone();
    let rendered_path = template
        .render(&context, &output_dir, |p| p.exists())
        .map_err(|e| (e, None))?;

    let relative = match relative_output_path(state, &rendered_path) {
        Some(r) => r,
        None => return Err((ServiceError::Internal(anyhow::anyhow!("rendered path escaped output directory")), None)),
    };
    state.job_store.mark_active_file(&relative).await;

    let job_id = job.id.clone();
    let backoff_schedule = state.config.downloads.backoff_schedule_secs.clone();
    let max_attempts = provider.max_attempts.max(1);
    let download_timeout = Duration::from_secs(state.config.timeouts.download_total_secs);
    let output_template_arg = rendered_path.display().to_string();

    let outcome = execute_with_retry(
        max_attempts,
        &backoff_schedule,
        |attempt_index| async {
            state
                .job_store
                .update(&job_id, |j| {
                    j.state = JobState::Processing;
                    j.attempt_count = attempt_index;
                })
                .await;
            state
                .invoker
                .download(&job.url, &job.params, &provider, &output_template_arg, download_timeout)
                .await
        },
        |attempt_index, err| {
            let reason = err.to_string();
            async move {
                state
                    .job_store
                    .update(&job_id, |j| {
                        j.state = JobState::Retrying;
                        j.attempt_count = attempt_index;
                        j.error_message = Some(reason);
                    })
                    .await;
            }
        },
    )
    .await;

    match outcome {
        Ok(download_outcome) => Ok((download_outcome.file_path, download_outcome.file_size_bytes)),
        Err(e) => Err((e, Some(rendered_path))),
    }
}

fn relative_output_path(state: &AppState, path: &Path) -> Option<String> {
    path.strip_prefix(&state.config.storage.output_dir)
        .ok()
        .map(|p| p.to_string_lossy().to_string())
}
