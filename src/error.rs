//! The single error taxonomy for the service. Every fallible operation
//! resolves, eventually, into one of these kinds; the HTTP edge renders them
//! as the structured JSON envelope described in §6/§7.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("the supplied URL does not match any known provider")]
    InvalidUrl,

    #[error("{0}")]
    InvalidFormat(String),

    #[error("produced file exceeds the configured size limit")]
    FileTooLarge,

    #[error("authentication failed")]
    AuthFailed,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("job queue is at capacity")]
    QueueFull,

    #[error("video is unavailable: {0}")]
    VideoUnavailable(String),

    #[error("requested format was not found")]
    FormatNotFound,

    #[error("no credential configured for this provider")]
    MissingCookie,

    #[error("credential has expired or failed validation")]
    CookieExpired,

    #[error("extractor invocation failed: {0}")]
    DownloadFailed(String),

    #[error("media transcoding failed: {0}")]
    TranscodingFailed(String),

    #[error("output storage is full")]
    StorageFull,

    #[error("component unavailable: {0}")]
    ComponentUnavailable(String),

    #[error("job not found")]
    JobNotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::QueueFull => "QUEUE_FULL",
            Self::VideoUnavailable(_) => "VIDEO_UNAVAILABLE",
            Self::FormatNotFound => "FORMAT_NOT_FOUND",
            Self::MissingCookie => "MISSING_COOKIE",
            Self::CookieExpired => "COOKIE_EXPIRED",
            Self::DownloadFailed(_) => "DOWNLOAD_FAILED",
            Self::TranscodingFailed(_) => "TRANSCODING_FAILED",
            Self::StorageFull => "STORAGE_FULL",
            Self::ComponentUnavailable(_) => "COMPONENT_UNAVAILABLE",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUrl | Self::InvalidFormat(_) | Self::FileTooLarge => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthFailed => StatusCode::UNAUTHORIZED,
            Self::VideoUnavailable(_) | Self::JobNotFound | Self::FormatNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::DownloadFailed(_) | Self::TranscodingFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::QueueFull
            | Self::ComponentUnavailable(_)
            | Self::StorageFull
            | Self::MissingCookie
            | Self::CookieExpired => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
    details: Option<String>,
    timestamp: String,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        // The `Internal` cause chain is logged, never rendered; everything
        // else renders the variant's own display text.
        let message = match &self {
            Self::Internal(cause) => {
                tracing::error!(error = %cause, "internal error");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error_code: self.error_code(),
            message,
            details: None,
            timestamp: Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
            suggestion: None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
