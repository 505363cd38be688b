//! Credential refresher.
//!
//! Periodically scans `social_connections` for tokens expiring within a
//! configurable threshold and exchanges them for a fresh long-lived token.
//! Also exposed for on-demand single-connection refresh from an admin
//! endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::Platform;
use crate::store::DataStore;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshOutcome {
    pub connection_id: Uuid,
    pub platform: Platform,
    pub status: RefreshStatus,
    pub new_expiry: Option<chrono::DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Refreshed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    expires_in: i64,
}

pub struct CredentialRefresher {
    store: Arc<dyn DataStore>,
    http: Client,
    exchange_base_url: String,
    threshold: chrono::Duration,
}

impl CredentialRefresher {
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, exchange_base_url: String, threshold: Duration) -> Self {
        Self {
            store,
            http: Client::new(),
            exchange_base_url,
            threshold: chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::days(7)),
        }
    }

    /// Background loop: runs every `interval`, refreshing any connection
    /// within `threshold` of expiry.
    pub fn spawn(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(outcomes) => {
                        let failed = outcomes.iter().filter(|o| o.status == RefreshStatus::Failed).count();
                        info!(refreshed = outcomes.len() - failed, failed, "credential refresh sweep complete");
                    }
                    Err(e) => error!(error = %e, "credential refresh sweep failed"),
                }
            }
        });
    }

    /// One sweep: find everything within the threshold and refresh it.
    pub async fn run_once(&self) -> Result<Vec<RefreshOutcome>, crate::error::AppError> {
        let cutoff = Utc::now() + self.threshold;
        let candidates = self.store.list_connections_expiring_within(cutoff).await?;

        let mut outcomes = Vec::with_capacity(candidates.len());
        for connection in candidates {
            outcomes.push(self.refresh_one(connection.id, connection.platform, &connection.access_token).await);
        }
        Ok(outcomes)
    }

    /// Refresh a single connection on demand (admin-triggered).
    pub async fn refresh_connection(&self, connection_id: Uuid) -> Result<RefreshOutcome, crate::error::AppError> {
        let connections = self.store.list_connections_expiring_within(Utc::now() + chrono::Duration::days(3650)).await?;
        let Some(connection) = connections.into_iter().find(|c| c.id == connection_id) else {
            return Err(crate::error::AppError::MissingConnection);
        };
        Ok(self.refresh_one(connection.id, connection.platform, &connection.access_token).await)
    }

    async fn refresh_one(&self, connection_id: Uuid, platform: Platform, current_token: &str) -> RefreshOutcome {
        match self.exchange_token(current_token).await {
            Ok((new_token, expires_in)) => {
                let now = Utc::now();
                let new_expiry = now + chrono::Duration::seconds(expires_in);
                if let Err(e) = self
                    .store
                    .update_connection_token(connection_id, &new_token, new_expiry, now)
                    .await
                {
                    warn!(connection_id = %connection_id, error = %e, "failed to persist refreshed token");
                    return RefreshOutcome {
                        connection_id,
                        platform,
                        status: RefreshStatus::Failed,
                        new_expiry: None,
                        error: Some(e.to_string()),
                    };
                }
                RefreshOutcome {
                    connection_id,
                    platform,
                    status: RefreshStatus::Refreshed,
                    new_expiry: Some(new_expiry),
                    error: None,
                }
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "token exchange failed");
                RefreshOutcome {
                    connection_id,
                    platform,
                    status: RefreshStatus::Failed,
                    new_expiry: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn exchange_token(&self, current_token: &str) -> Result<(String, i64), crate::error::AppError> {
        let url = format!("{}/oauth/access_token", self.exchange_base_url);
        let response = self
            .http
            .get(url)
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("fb_exchange_token", current_token),
            ])
            .send()
            .await
            .map_err(|e| crate::error::AppError::TransientNetwork(e.to_string()))?;

        if !response.status().is_success() {
            return Err(crate::error::AppError::PermanentUpstream(format!(
                "token exchange returned {}",
                response.status()
            )));
        }

        let body: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| crate::error::AppError::PermanentUpstream(format!("unparseable exchange response: {e}")))?;

        Ok((body.access_token, body.expires_in))
    }
}
