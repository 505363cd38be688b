//! Startup configuration for the social webhook bridge.
//!
//! All configuration is loaded from environment variables. Missing required
//! secrets is a fatal startup error: `Config::from_env` panics
//! rather than returning a degraded instance, since there is no safe
//! partially-configured state to serve traffic from.

use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,

    // === Required secrets ===
    /// HMAC secret used to verify inbound webhook signatures and signed
    /// data-deletion requests.
    pub app_secret: String,
    /// Postgres connection string for the data service.
    pub database_url: String,
    /// Service-role credential for the data service (kept distinct from
    /// `database_url` even though both configure the same
    /// Postgres connection here).
    pub data_service_key: String,
    /// Fallback AI API key used when a tenant has no per-tenant override.
    pub default_ai_api_key: String,
    /// Public base URL this service is reachable at (used in data-deletion
    /// status URLs).
    pub public_site_url: String,

    // === Signature verification ===
    /// If true, requests without a matching signature are accepted with a
    /// warning instead of being rejected. Operator opt-in only; defaults
    /// to fail-closed.
    pub signature_check_disabled: bool,

    // === Queue / worker tuning ===
    pub default_drain_batch_size: i64,
    pub max_retry_count: i32,
    pub worker_concurrency: usize,
    /// Claims older than this are reverted from `processing` back to
    /// `pending` by the stale-claim reaper.
    pub stale_claim_timeout: Duration,

    // === Retry core defaults ===
    pub retry_initial_delay: Duration,
    pub retry_backoff_factor: f64,
    pub retry_max_delay: Duration,

    // === Session store ===
    pub session_ttl: Duration,
    pub session_cleanup_interval: Duration,

    // === Credential refresher ===
    pub credential_refresh_interval: Duration,
    pub credential_refresh_threshold: Duration,

    // === Outbound timeouts ===
    pub ai_call_timeout: Duration,
    pub provider_send_timeout: Duration,

    pub ai_runtime_base_url: String,
    pub provider_graph_base_url: String,
}

impl Config {
    /// Load configuration from environment variables, panicking on any
    /// missing required secret.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),

            app_secret: required_secret("APP_SECRET"),
            database_url: required_secret("DATABASE_URL"),
            data_service_key: required_secret("DATA_SERVICE_SERVICE_KEY"),
            default_ai_api_key: required_secret("DEFAULT_AI_API_KEY"),
            public_site_url: required_secret("PUBLIC_SITE_URL"),

            signature_check_disabled: std::env::var("SIGNATURE_CHECK_DISABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            default_drain_batch_size: env_parse("DEFAULT_DRAIN_BATCH_SIZE", 5),
            max_retry_count: env_parse("MAX_RETRY_COUNT", 3),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 5),
            stale_claim_timeout: Duration::from_secs(env_parse("STALE_CLAIM_TIMEOUT_SECS", 60)),

            retry_initial_delay: Duration::from_millis(env_parse("RETRY_INITIAL_DELAY_MS", 500)),
            retry_backoff_factor: env_parse_f64("RETRY_BACKOFF_FACTOR", 2.0),
            retry_max_delay: Duration::from_millis(env_parse("RETRY_MAX_DELAY_MS", 10_000)),

            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SECS", 365 * 24 * 3600)),
            session_cleanup_interval: Duration::from_secs(env_parse(
                "SESSION_CLEANUP_INTERVAL_SECS",
                3600,
            )),

            credential_refresh_interval: Duration::from_secs(env_parse(
                "CREDENTIAL_REFRESH_INTERVAL_SECS",
                24 * 3600,
            )),
            credential_refresh_threshold: Duration::from_secs(env_parse(
                "CREDENTIAL_REFRESH_THRESHOLD_SECS",
                7 * 24 * 3600,
            )),

            ai_call_timeout: Duration::from_secs(env_parse("AI_CALL_TIMEOUT_SECS", 15)),
            provider_send_timeout: Duration::from_secs(env_parse("PROVIDER_SEND_TIMEOUT_SECS", 10)),

            ai_runtime_base_url: std::env::var("AI_RUNTIME_BASE_URL")
                .unwrap_or_else(|_| "https://runtime.example.com".to_string()),
            provider_graph_base_url: std::env::var("PROVIDER_GRAPH_BASE_URL")
                .unwrap_or_else(|_| "https://graph.provider.com/v18.0".to_string()),
        }
    }
}

fn required_secret(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| {
        panic!("fatal startup error: required configuration `{name}` is not set")
    })
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_required_env<F: FnOnce()>(f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("APP_SECRET", "secret");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        std::env::set_var("DATA_SERVICE_SERVICE_KEY", "key");
        std::env::set_var("DEFAULT_AI_API_KEY", "ai-key");
        std::env::set_var("PUBLIC_SITE_URL", "https://example.com");
        f();
        for var in [
            "APP_SECRET",
            "DATABASE_URL",
            "DATA_SERVICE_SERVICE_KEY",
            "DEFAULT_AI_API_KEY",
            "PUBLIC_SITE_URL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn loads_defaults_when_optional_vars_absent() {
        with_required_env(|| {
            let config = Config::from_env();
            assert_eq!(config.default_drain_batch_size, 5);
            assert_eq!(config.max_retry_count, 3);
            assert!(!config.signature_check_disabled);
        });
    }

    #[test]
    #[should_panic(expected = "APP_SECRET")]
    fn panics_on_missing_required_secret() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("APP_SECRET");
        let _ = Config::from_env();
    }
}
