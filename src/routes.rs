//! Router composition (C15): public health endpoints, then the
//! authenticated `/api/v1` surface behind the maintenance and auth guards.

use crate::handlers::{admin, download, health, info, jobs};
use crate::middleware::{auth_guard, health_guard};
use crate::state::AppState;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, state.config.security.api_header.parse().unwrap_or(header::AUTHORIZATION)])
        .max_age(Duration::from_secs(3600));

    let api = Router::new()
        .route("/info", get(info::get_info))
        .route("/formats", get(info::get_formats))
        .route("/download", post(download::create_download))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/admin/providers", get(admin::list_providers))
        .route("/admin/validate-cookie", post(admin::validate_cookie))
        .route("/admin/reload-cookie", post(admin::reload_cookie))
        .route("/admin/reap", post(admin::trigger_reap))
        .layer(middleware::from_fn_with_state(state.clone(), auth_guard))
        .layer(middleware::from_fn_with_state(state.clone(), health_guard));

    Router::new()
        .route("/health", get(health::readiness))
        .route("/liveness", get(health::liveness))
        .route("/readiness", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
