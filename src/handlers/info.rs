//! `GET /api/v1/info` — synchronous metadata lookup.

use crate::auth::CallerIdentity;
use crate::cookies::ValidationResult;
use crate::error::{ServiceError, ServiceResult};
use crate::extractor::retry::execute_with_retry;
use crate::models::VideoMetadata;
use crate::ratelimit::Category;
use crate::state::AppState;
use crate::validation::validate_url;
use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub url: String,
}

#[instrument(skip(state, identity))]
pub async fn get_info(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Query(query): Query<InfoQuery>,
) -> ServiceResult<Json<VideoMetadata>> {
    validate_url(&query.url, &state.config.providers)?;

    state
        .rate_limiter
        .admit(&identity.key_hash, Category::Metadata)
        .await
        .map_err(|retry_after| ServiceError::RateLimitExceeded {
            retry_after_secs: retry_after.as_secs().max(1),
        })?;

    let provider = {
        let dispatcher = state.dispatcher.lock().await;
        dispatcher.select(&query.url, &state.config.providers)?.clone()
    };

    if provider.cookie_path.is_some() {
        if let Some(record) = state.cookie_store.snapshot(&provider.name).await {
            if record.validation_result == ValidationResult::Invalid {
                return Err(ServiceError::CookieExpired);
            }
        }
    }

    let timeout = Duration::from_secs(state.config.timeouts.metadata_attempt_secs);
    let backoff = state.config.downloads.backoff_schedule_secs.clone();
    let max_attempts = provider.max_attempts.max(1);

    let invoker = state.invoker.clone();
    let metadata = execute_with_retry(
        max_attempts,
        &backoff,
        |_attempt| {
            let url = query.url.clone();
            let provider = provider.clone();
            let invoker = invoker.clone();
            async move { invoker.fetch_metadata(&url, &provider, timeout).await }
        },
        |_, _| async {},
    )
    .await?;

    Ok(Json(metadata))
}

/// `GET /api/v1/formats` — same lookup path as `/info`, trimmed down to the
/// sorted `formats` array only.
#[instrument(skip(state, identity))]
pub async fn get_formats(
    state: State<AppState>,
    identity: Extension<CallerIdentity>,
    query: Query<InfoQuery>,
) -> ServiceResult<Json<Vec<crate::models::FormatInfo>>> {
    let metadata = get_info(state, identity, query).await?;
    Ok(Json(metadata.0.formats))
}
