//! `GET/POST /api/drain` — operator/cron-triggered queue drain.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::handlers::AppState;

#[derive(Debug, Deserialize)]
pub struct DrainQuery {
    #[serde(rename = "batchSize")]
    batch_size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct DrainResponse {
    status: &'static str,
    processed: u64,
    results: DrainResults,
}

#[derive(Debug, Serialize)]
struct DrainResults {
    completed: u64,
    retried: u64,
    dead_lettered: u64,
}

pub async fn drain(State(state): State<AppState>, Query(query): Query<DrainQuery>) -> Response {
    let batch_size = query.batch_size.unwrap_or(state.config.default_drain_batch_size);

    match state.worker.drain(batch_size).await {
        Ok(summary) => Json(DrainResponse {
            status: "ok",
            processed: summary.completed + summary.retried + summary.dead_lettered,
            results: DrainResults {
                completed: summary.completed,
                retried: summary.retried,
                dead_lettered: summary.dead_lettered,
            },
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
