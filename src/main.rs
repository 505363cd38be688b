//! social-bridge — multi-tenant social webhook to AI runtime bridge.

use std::sync::Arc;

use social_bridge::config::Config;
use social_bridge::handlers::{self, AppState};
use social_bridge::store::{DataStore, PgStore};
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env();
    log_startup_info(&config);

    let store: Arc<dyn DataStore> = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .expect("failed to connect to the data service"),
    );

    let config = Arc::new(config);
    let state = AppState::new(store, config.clone());

    state.credential_refresher.clone().spawn(config.credential_refresh_interval);
    spawn_session_cleanup(state.clone(), config.session_cleanup_interval);
    spawn_queue_drainer(state.clone(), config.clone());

    let app = handlers::build_router(state);
    serve(app, &config).await;
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("social_bridge=info,tower_http=info")))
        .init();
}

fn log_startup_info(config: &Config) {
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        worker_concurrency = config.worker_concurrency,
        default_drain_batch_size = config.default_drain_batch_size,
        signature_check_disabled = config.signature_check_disabled,
        "starting social-bridge"
    );
}

fn spawn_session_cleanup(state: AppState, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.store.delete_expired_sessions(chrono::Utc::now()).await {
                Ok(cleaned) => info!(cleaned, "session cleanup sweep complete"),
                Err(e) => tracing::error!(error = %e, "session cleanup sweep failed"),
            }
        }
    });
}

fn spawn_queue_drainer(state: AppState, config: Arc<Config>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(social_bridge::worker::DEFAULT_DRAIN_INTERVAL);
        loop {
            ticker.tick().await;
            match state.worker.drain(config.default_drain_batch_size).await {
                Ok(summary) => info!(
                    completed = summary.completed,
                    retried = summary.retried,
                    dead_lettered = summary.dead_lettered,
                    "queue drain complete"
                ),
                Err(e) => tracing::error!(error = %e, "queue drain failed"),
            }
        }
    });
}

async fn serve(app: axum::Router, config: &Config) {
    let bind_addr = format!("{}:{}", config.bind_addr, config.port);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind to address");

    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app).await.expect("server error");
}
