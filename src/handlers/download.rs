//! `POST /api/v1/download` — always asynchronous: enqueues a job and
//! returns `202 Accepted` with the job's id and initial state.

use crate::auth::CallerIdentity;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{DownloadParams, Job};
use crate::ratelimit::Category;
use crate::scheduler::DOWNLOAD_PRIORITY;
use crate::state::AppState;
use crate::template::ValidatedTemplate;
use crate::validation::{
    validate_audio_format, validate_audio_quality, validate_format_id, validate_subtitle_lang,
    validate_url,
};
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::instrument;

#[instrument(skip(state, identity, params))]
pub async fn create_download(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(params): Json<DownloadParams>,
) -> ServiceResult<(StatusCode, Json<Job>)> {
    validate_url(&params.url, &state.config.providers)?;
    if let Some(format_id) = &params.format_id {
        validate_format_id(format_id)?;
    }
    if params.audio_only {
        if let Some(format) = &params.audio_format {
            validate_audio_format(format)?;
        }
        if let Some(quality) = params.audio_quality {
            validate_audio_quality(quality)?;
        }
    }
    if params.subtitles {
        if let Some(lang) = &params.subtitle_lang {
            validate_subtitle_lang(lang)?;
        }
    }
    let template_raw = params
        .output_template
        .clone()
        .unwrap_or_else(|| state.config.templates.default_template.clone());
    ValidatedTemplate::parse(&template_raw)?;

    state
        .rate_limiter
        .admit(&identity.key_hash, Category::Download)
        .await
        .map_err(|retry_after| ServiceError::RateLimitExceeded {
            retry_after_secs: retry_after.as_secs().max(1),
        })?;

    {
        let dispatcher = state.dispatcher.lock().await;
        dispatcher.select(&params.url, &state.config.providers)?;
    }

    let job = state.job_store.create(params.url.clone(), params).await;
    let priority = job.params.priority.unwrap_or(DOWNLOAD_PRIORITY);
    state.scheduler.enqueue(job.id.clone(), priority).await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}
