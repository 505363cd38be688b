//! HTTP entry points.
//!
//! Four stateless handlers share one [`AppState`]: verify/ingest the
//! webhook, drain the queue, sweep expired sessions, and process the
//! provider's data-deletion callback.

pub mod cleanup;
pub mod data_deletion;
pub mod drain;
pub mod webhook;

use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::ai_client::AiClient;
use crate::config::Config;
use crate::credentials::CredentialRefresher;
use crate::provider_client::ProviderClient;
use crate::store::DataStore;
use crate::worker::Worker;

/// Maximum inbound webhook body size. Providers send small JSON payloads;
/// this is generous headroom against abuse.
pub const MAX_BODY_SIZE: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub worker: Arc<Worker>,
    pub credential_refresher: Arc<CredentialRefresher>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, config: Arc<Config>) -> Self {
        let ai_client = Arc::new(AiClient::new(config.ai_runtime_base_url.clone(), config.ai_call_timeout));
        let provider_client = Arc::new(ProviderClient::new(
            config.provider_graph_base_url.clone(),
            config.provider_send_timeout,
        ));
        let worker = Arc::new(Worker::new(store.clone(), ai_client, provider_client, config.clone()));
        let credential_refresher = Arc::new(CredentialRefresher::new(
            store.clone(),
            config.provider_graph_base_url.clone(),
            config.credential_refresh_threshold,
        ));

        Self {
            store,
            worker,
            credential_refresher,
            config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/webhooks/:tenant/:platform/:nonce",
            get(webhook::verify).post(webhook::ingest),
        )
        .route("/api/drain", get(drain::drain).post(drain::drain))
        .route("/api/session-cleanup", get(cleanup::cleanup).post(cleanup::cleanup))
        .route("/api/data-deletion", post(data_deletion::data_deletion))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
