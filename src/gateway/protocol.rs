//! Gateway Wire Protocol
//!
//! Response DTOs of the public `/v1/kv` surface. Stored values travel as
//! raw bytes; these shapes cover acknowledgments and health.

use serde::{Deserialize, Serialize};

/// Acknowledgment for PUT and DELETE.
#[derive(Debug, Serialize, Deserialize)]
pub struct KvWriteResponse {
    pub success: bool,
    pub key: String,
    pub primary_node: String,
    /// Number of replica nodes the mutation was dispatched to.
    pub replicas: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub service: String,
    pub nodes: Vec<String>,
}

/// Query parameters accepted by PUT.
#[derive(Debug, Deserialize)]
pub struct TtlQuery {
    /// Time-to-live in the `<int><unit>` duration grammar (`30s`, `5m`, ...).
    pub ttl: Option<String>,
}
