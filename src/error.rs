//! Shared error taxonomy threaded through every component.
//!
//! Mirrors the kinds in the design's error handling section: signature and
//! payload errors terminate the HTTP request immediately, everything else is
//! recorded per-stage and drives the retry core's transient/permanent split.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

/// Top-level error kind, shared by the HTTP boundary and the worker pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("signature header missing")]
    MissingSignature,
    #[error("signature header malformed: {0}")]
    MalformedHeader(String),
    #[error("payload could not be parsed: {0}")]
    MalformedPayload(String),
    #[error("unknown tenant")]
    UnknownTenant,
    #[error("no matching social connection")]
    MissingConnection,
    #[error("no active AI project binding")]
    MissingAiBinding,
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),
    #[error("permanent upstream error: {0}")]
    PermanentUpstream(String),
    #[error("operation timed out")]
    Timeout,
    #[error("data service unavailable: {0}")]
    DataUnavailable(String),
    #[error("required configuration missing: {0}")]
    ConfigMissing(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stage-independent transient classification.
    ///
    /// Individual call sites may override with a more specific predicate;
    /// this is the fallback used when no override applies.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::TransientNetwork(_) | AppError::TransientUpstream(_) | AppError::Timeout
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
            AppError::MissingSignature => (StatusCode::UNAUTHORIZED, "MISSING_SIGNATURE"),
            AppError::MalformedHeader(_) => (StatusCode::BAD_REQUEST, "MALFORMED_HEADER"),
            AppError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            AppError::UnknownTenant => (StatusCode::NOT_FOUND, "UNKNOWN_TENANT"),
            AppError::MissingConnection => (StatusCode::NOT_FOUND, "MISSING_CONNECTION"),
            AppError::MissingAiBinding => (StatusCode::NOT_FOUND, "MISSING_AI_BINDING"),
            AppError::TransientNetwork(_) => (StatusCode::SERVICE_UNAVAILABLE, "TRANSIENT_NETWORK"),
            AppError::TransientUpstream(_) => (StatusCode::BAD_GATEWAY, "TRANSIENT_UPSTREAM"),
            AppError::PermanentUpstream(_) => (StatusCode::BAD_GATEWAY, "PERMANENT_UPSTREAM"),
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            AppError::DataUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "DATA_UNAVAILABLE"),
            AppError::ConfigMissing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_MISSING"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorBody {
            error: self.to_string(),
            code,
        });

        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

pub type AppResult<T> = Result<T, AppError>;
