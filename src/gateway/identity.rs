//! External Collaborator Interfaces
//!
//! Identity and usage live outside the data plane. The gateway only needs
//! two calls: resolve an API key to a tenant, and hand off a usage record.
//! Both are traits so deployments can swap the user-manager service for
//! anything else without touching the orchestration code.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves presented API keys to tenant ids.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the owning tenant's user id, or an error for any key that
    /// cannot be positively validated. An unreachable provider is an
    /// authentication failure, not a gateway failure.
    async fn resolve(&self, api_key: &str) -> Result<i64>;
}

/// Identity provider backed by the user-manager service.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidateKeyResponse {
    user_id: i64,
    valid: bool,
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, api_key: &str) -> Result<i64> {
        let response = self
            .client
            .post(format!("{}/validate-key", self.base_url))
            .json(&serde_json::json!({ "api_key": api_key }))
            .timeout(AUTH_TIMEOUT)
            .send()
            .await
            .context("identity provider unreachable")?;

        if !response.status().is_success() {
            bail!("API key validation failed with status {}", response.status());
        }

        let body: ValidateKeyResponse = response
            .json()
            .await
            .context("invalid validate-key response")?;
        if !body.valid {
            bail!("invalid API key");
        }

        Ok(body.user_id)
    }
}

/// Receives one record per authenticated request, after the response is
/// sent. Implementations must not block the request path; the gateway calls
/// this from a detached task and ignores failures.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_request(&self, user_id: i64, method: &str, path: &str, status: u16);
}

/// Default sink when no collector is configured: the record goes to the log
/// stream and nowhere else.
pub struct LogUsageSink;

#[async_trait]
impl UsageSink for LogUsageSink {
    async fn record_request(&self, user_id: i64, method: &str, path: &str, status: u16) {
        tracing::debug!(user_id, method, path, status, "usage record");
    }
}
