//! `GET /api/v1/jobs/:id` — job status polling.

use crate::error::{ServiceError, ServiceResult};
use crate::models::Job;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use tracing::instrument;

#[instrument(skip(state))]
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ServiceResult<Json<Job>> {
    state
        .job_store
        .get(&job_id)
        .await
        .map(Json)
        .ok_or(ServiceError::JobNotFound)
}
