//! `GET/POST /api/session-cleanup` — expired session sweep.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::handlers::AppState;

#[derive(Debug, Serialize)]
struct CleanupResponse {
    cleaned: u64,
}

pub async fn cleanup(State(state): State<AppState>) -> Response {
    match state.store.delete_expired_sessions(chrono::Utc::now()).await {
        Ok(cleaned) => Json(CleanupResponse { cleaned }).into_response(),
        Err(e) => e.into_response(),
    }
}
