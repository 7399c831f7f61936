//! Liveness, readiness, and metrics endpoints, exempt from authentication.

use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::fmt::Write as _;

pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.readiness.check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Minimal hand-rolled Prometheus text exposition (no grounding for a
/// metrics-exposition crate anywhere in the retrieved pack, so this stays
/// plain text rather than reaching for an ungrounded dependency).
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let queue_depth = state.scheduler.len().await;
    let job_counts = state.job_store.counts_by_state().await;

    let mut body = String::new();
    let _ = writeln!(body, "# HELP extractor_gateway_queue_depth Current scheduler queue depth");
    let _ = writeln!(body, "# TYPE extractor_gateway_queue_depth gauge");
    let _ = writeln!(body, "extractor_gateway_queue_depth {queue_depth}");

    let _ = writeln!(body, "# HELP extractor_gateway_jobs_total Jobs currently tracked, by state");
    let _ = writeln!(body, "# TYPE extractor_gateway_jobs_total gauge");
    for (state_name, count) in job_counts {
        let _ = writeln!(
            body,
            "extractor_gateway_jobs_total{{state=\"{state_name}\"}} {count}"
        );
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
