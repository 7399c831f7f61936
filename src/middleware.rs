//! Perimeter middleware: maintenance-mode short-circuit and API key
//! authentication (C12).

use crate::auth::{authenticate, is_exempt_path};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

pub async fn health_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Err(reason) = state.is_operational().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error_code": "COMPONENT_UNAVAILABLE",
                "message": reason,
            })),
        )
            .into_response();
    }
    next.run(req).await
}

/// Rejects any request outside the exempt paths that does not carry a
/// configured API key in the `security.api_header` header.
pub async fn auth_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_exempt_path(req.uri().path()) {
        return next.run(req).await;
    }

    let header_name = state.config.security.api_header.as_str();
    let candidate = req
        .headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok());

    let Some(candidate) = candidate else {
        warn!(path = %req.uri().path(), "request missing API key header");
        return unauthenticated();
    };

    match authenticate(candidate, &state.config.security.api_keys) {
        Some(identity) => {
            let mut req = req;
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => {
            warn!(path = %req.uri().path(), "request carried an unrecognized API key");
            unauthenticated()
        }
    }
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error_code": "AUTH_FAILED",
            "message": "authentication failed",
        })),
    )
        .into_response()
}
