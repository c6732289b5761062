//! API Gateway
//!
//! The public face of the store. Every client request passes through the
//! middleware stack (logging, CORS, authentication, rate limiting) before an
//! orchestration handler routes it through the hash ring: write to the
//! primary node, then fan out replication with the requested consistency.
//!
//! External collaborators are reached through narrow interfaces: an
//! [`identity::IdentityProvider`] resolves API keys to tenants and an
//! [`identity::UsageSink`] receives fire-and-forget usage records. The
//! gateway itself holds no user state beyond the rate-limiter buckets.

pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod protocol;
pub mod ratelimit;


use std::sync::Arc;

use crate::config::Config;
use crate::ring::HashRing;

use self::identity::{IdentityProvider, UsageSink};
use self::ratelimit::RateLimiterStore;

/// Long-lived gateway state shared by middleware and handlers.
pub struct GatewayState {
    pub config: Config,
    pub ring: HashRing,
    pub http_client: reqwest::Client,
    pub rate_limiter: RateLimiterStore,
    pub identity: Arc<dyn IdentityProvider>,
    pub usage: Arc<dyn UsageSink>,
}

impl GatewayState {
    pub fn new(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        usage: Arc<dyn UsageSink>,
    ) -> Arc<Self> {
        let ring = HashRing::new(config.nodes.clone());
        Arc::new(Self {
            ring,
            http_client: reqwest::Client::new(),
            rate_limiter: RateLimiterStore::new(),
            identity,
            usage,
            config,
        })
    }

    /// Endpoint of the co-located replication coordinator.
    pub fn replicator_url(&self) -> String {
        format!("http://localhost:{}/replicate", self.config.replicator_port)
    }

    /// Starts the periodic sweep of idle rate-limit buckets.
    pub fn spawn_bucket_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ratelimit::SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = state.rate_limiter.sweep_idle(ratelimit::IDLE_EXPIRY);
                if removed > 0 {
                    tracing::debug!(removed, "swept idle rate-limit buckets");
                }
            }
        })
    }
}
