//! Replication Wire Protocol
//!
//! JSON DTOs exchanged on `POST /replicate` and the coordinator's metrics
//! and health endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "SET")]
    Set,
    #[serde(rename = "DELETE")]
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    #[default]
    Eventual,
    Strong,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Eventual => "eventual",
            Consistency::Strong => "strong",
        }
    }
}

/// A mutation to push to the replicas of a key. Built by the gateway after
/// a successful primary write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationRequest {
    pub key: String,
    /// Present for SET, absent for DELETE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    pub operation: Operation,
    /// Remaining time-to-live in nanoseconds, if any.
    #[serde(default, rename = "ttl", skip_serializing_if = "Option::is_none")]
    pub ttl_ns: Option<u64>,
    /// Missing consistency defaults to eventual.
    #[serde(default)]
    pub consistency: Consistency,
    pub primary_node: String,
    pub replica_nodes: Vec<String>,
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicationResponse {
    pub success: bool,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acked_nodes: Vec<String>,
}

/// Snapshot returned by `GET /metrics`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicationMetrics {
    /// Tasks received, both modes.
    pub total_replications: u64,
    /// Per-replica acknowledgments.
    pub successful_replicas: u64,
    /// Per-replica failures (transport errors and non-2xx responses).
    pub failed_replicas: u64,
    /// Tasks dropped after exhausting their retry budget.
    pub permanent_failures: u64,
    /// Instantaneous eventual-queue depth.
    pub queue_size: usize,
    /// Mean task completion latency over the last 1000 completions.
    pub average_ack_time_ms: f64,
    /// High-water mark of enqueue-to-completion lag since start.
    pub max_replication_lag_ms: u64,
    pub retries_in_progress: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicatorHealth {
    pub status: String,
    pub service: String,
    pub queue_size: usize,
}
