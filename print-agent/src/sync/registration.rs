//! Bulk printer registration over the backend REST surface
//!
//! Runs next to the event channel, never instead of it. A failure is
//! logged by the caller and the agent keeps working channel-only.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use shared::message::AgentIdentity;
use shared::models::PrinterRecord;

use super::{SyncConfig, SyncError};
use crate::resilience::{
    BreakerError, BreakerRegistry, CircuitBreaker, ConnectionPool, ManageConnection, PoolConfig,
    PoolError, PoolStats,
};

/// Pooled HTTP sessions against one backend
pub struct HttpSessionManager {
    base_url: String,
    timeout: Duration,
}

#[async_trait]
impl ManageConnection for HttpSessionManager {
    type Connection = Client;
    type Error = reqwest::Error;

    async fn connect(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("print-agent/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    async fn is_valid(&self, conn: &mut Client) -> bool {
        match conn.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Backend health probe failed");
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest<'a> {
    branch_id: &'a str,
    device_id: &'a str,
    printers: &'a [PrinterRecord],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRegistration {
    #[serde(default)]
    pub registered: usize,
    #[serde(default)]
    pub failed: usize,
}

pub struct BackendClient {
    base_url: String,
    identity: AgentIdentity,
    pool: ConnectionPool<HttpSessionManager>,
    breaker: Arc<CircuitBreaker>,
}

impl BackendClient {
    pub fn new(config: &SyncConfig, pool: PoolConfig, breakers: &BreakerRegistry) -> Result<Self, SyncError> {
        let base_url = config
            .backend_url
            .as_deref()
            .ok_or(SyncError::Disabled)?
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SyncError::InvalidUrl(base_url));
        }

        let manager = HttpSessionManager {
            base_url: base_url.clone(),
            timeout: config.request_timeout,
        };
        Ok(Self {
            base_url,
            identity: config.identity(),
            pool: ConnectionPool::new(manager, pool),
            breaker: breakers.get_or_create(BreakerRegistry::BACKEND_HTTP),
        })
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// `POST {backend}/printers/bulk` through the breaker and the pool
    #[instrument(skip_all, fields(count = printers.len()))]
    pub async fn register_printers(&self, printers: &[PrinterRecord]) -> Result<BulkRegistration, SyncError> {
        let url = format!("{}/printers/bulk", self.base_url);
        let body = BulkRequest {
            branch_id: &self.identity.branch_id,
            device_id: &self.identity.device_id,
            printers,
        };

        let result = self
            .breaker
            .call(|| async {
                let mut conn = self.pool.get().await.map_err(pool_error)?;
                let resp = match conn
                    .post(&url)
                    .header("X-License-Key", &self.identity.license_key)
                    .header("X-Branch-Id", &self.identity.branch_id)
                    .header("X-Device-Id", &self.identity.device_id)
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(resp) => resp,
                    Err(e) => {
                        conn.mark_broken();
                        return Err(SyncError::Http(e));
                    }
                };

                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(SyncError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                // Older backends answer with an empty body
                let bytes = resp.bytes().await?;
                let parsed: BulkRegistration = serde_json::from_slice(&bytes).unwrap_or(BulkRegistration {
                    registered: printers.len(),
                    failed: 0,
                });
                Ok(parsed)
            })
            .await;

        match result {
            Ok(reg) => {
                info!(registered = reg.registered, failed = reg.failed, "Bulk printer registration complete");
                Ok(reg)
            }
            Err(BreakerError::Inner(e)) => Err(e),
            Err(e @ BreakerError::Open { .. }) => Err(SyncError::Unavailable(e.to_string())),
            Err(e @ BreakerError::Timeout(_)) => Err(SyncError::Unavailable(e.to_string())),
        }
    }
}

fn pool_error(err: PoolError<reqwest::Error>) -> SyncError {
    match err {
        PoolError::Connect(e) => SyncError::Http(e),
        other => SyncError::Unavailable(other.to_string()),
    }
}
