//! Storage Node Wire Protocol
//!
//! DTOs for the node's internal HTTP surface. Values themselves travel as
//! raw bytes in request and response bodies; only acknowledgments, metrics
//! and health use JSON.

use serde::{Deserialize, Serialize};

/// Acknowledgment for PUT and DELETE.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
    pub key: String,
    pub node_id: String,
}

/// Snapshot returned by `GET /metrics`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: String,
    /// Live entries only; expired ones are excluded even before the reaper
    /// removes them.
    pub key_count: usize,
    pub wal_size_bytes: u64,
    /// Unix seconds at sampling time.
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeHealth {
    pub status: String,
    pub node_id: String,
}

/// Query parameters accepted by PUT.
#[derive(Debug, Deserialize)]
pub struct StoreQuery {
    /// Time-to-live in the `<int><unit>` duration grammar (`30s`, `5m`, ...).
    pub ttl: Option<String>,
}
