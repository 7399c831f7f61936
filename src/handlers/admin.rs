//! Administrative endpoints: provider status, explicit storage reap, and
//! credential reload.

use crate::cookies::ValidationResult;
use crate::error::{ServiceError, ServiceResult};
use crate::extractor::ExtractorLivenessProbe;
use crate::state::AppState;
use crate::storage::{run_reaper_pass, ReaperReport};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct ProviderNameBody {
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    pub credential_configured: bool,
    pub validation_result: Option<&'static str>,
    pub age_seconds: Option<i64>,
    pub is_aging: Option<bool>,
}

#[instrument(skip(state))]
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderStatus>> {
    let dispatcher = state.dispatcher.lock().await;
    let mut statuses = Vec::with_capacity(state.config.providers.len());
    for provider in &state.config.providers {
        let snapshot = state.cookie_store.snapshot(&provider.name).await;
        statuses.push(ProviderStatus {
            name: provider.name.clone(),
            enabled: dispatcher.is_enabled(&provider.name),
            credential_configured: provider.cookie_path.is_some(),
            validation_result: snapshot.as_ref().map(|r| validation_label(r.validation_result)),
            age_seconds: state.cookie_store.age_seconds(&provider.name).await,
            is_aging: state.cookie_store.is_aging(&provider.name).await,
        });
    }
    Json(statuses)
}

#[derive(Debug, Serialize)]
pub struct ReapResult {
    pub files_removed: usize,
    pub bytes_reclaimed: u64,
}

impl From<ReaperReport> for ReapResult {
    fn from(r: ReaperReport) -> Self {
        Self {
            files_removed: r.files_removed,
            bytes_reclaimed: r.bytes_reclaimed,
        }
    }
}

#[instrument(skip(state))]
pub async fn trigger_reap(State(state): State<AppState>) -> Json<ReapResult> {
    let report = run_reaper_pass(
        &state.config.storage.output_dir,
        &state.job_store,
        state.config.storage.cleanup_threshold_pct as f64,
        Duration::from_secs(state.config.storage.cleanup_age_hours * 3600),
        true,
    )
    .await;
    Json(report.into())
}

fn liveness_probe(state: &AppState) -> ExtractorLivenessProbe {
    ExtractorLivenessProbe {
        invoker: state.invoker.clone(),
        providers: state.config.providers.clone(),
        timeout: Duration::from_secs(state.config.timeouts.metadata_attempt_secs),
    }
}

fn validation_label(result: ValidationResult) -> &'static str {
    match result {
        ValidationResult::Unchecked => "UNCHECKED",
        ValidationResult::Valid => "VALID",
        ValidationResult::Invalid => "INVALID",
    }
}

async fn provider_status_snapshot(state: &AppState, provider: &str) -> ProviderStatus {
    let snapshot = state.cookie_store.snapshot(provider).await;
    ProviderStatus {
        name: provider.to_string(),
        enabled: state.dispatcher.lock().await.is_enabled(provider),
        credential_configured: true,
        validation_result: snapshot.as_ref().map(|r| validation_label(r.validation_result)),
        age_seconds: state.cookie_store.age_seconds(provider).await,
        is_aging: state.cookie_store.is_aging(provider).await,
    }
}

/// `POST /api/v1/admin/validate-cookie` — forces a fresh validation probe,
/// bypassing the cache-until window only if it has expired or the file
/// changed (`CookieStore::validate` itself decides that); this is the
/// "force validation" contract of §6, not an unconditional reprobe.
#[instrument(skip(state))]
pub async fn validate_cookie(
    State(state): State<AppState>,
    Json(body): Json<ProviderNameBody>,
) -> ServiceResult<Json<ProviderStatus>> {
    if !state.cookie_store.has_provider(&body.provider).await {
        return Err(ServiceError::MissingCookie);
    }

    let probe = liveness_probe(&state);
    state
        .cookie_store
        .validate(&body.provider, &probe)
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(provider_status_snapshot(&state, &body.provider).await))
}

/// `POST /api/v1/admin/reload-cookie` — atomically re-reads the provider's
/// configured credential path from disk and re-validates it; on a failed
/// validation the previous credential is restored and the request fails
/// with 400, per §6's "400 if new credential invalid".
#[instrument(skip(state))]
pub async fn reload_cookie(
    State(state): State<AppState>,
    Json(body): Json<ProviderNameBody>,
) -> ServiceResult<Json<ProviderStatus>> {
    let provider = state
        .config
        .providers
        .iter()
        .find(|p| p.name == body.provider)
        .ok_or(ServiceError::ComponentUnavailable(body.provider.clone()))?;
    let cookie_path = provider
        .cookie_path
        .as_ref()
        .ok_or(ServiceError::MissingCookie)?;

    let probe = liveness_probe(&state);
    state
        .cookie_store
        .reload(&body.provider, cookie_path, &probe)
        .await
        .map_err(|e| ServiceError::InvalidFormat(e.to_string()))?;

    Ok(Json(provider_status_snapshot(&state, &body.provider).await))
}
