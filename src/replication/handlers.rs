//! Replication API Handlers
//!
//! HTTP endpoints of the coordinator service. The single entry point is
//! `POST /replicate`; consistency selects the queued eventual path or the
//! synchronous quorum path.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;

use crate::error::ApiError;

use super::coordinator::Coordinator;
use super::protocol::{
    Consistency, ReplicationMetrics, ReplicationRequest, ReplicationResponse, ReplicatorHealth,
};

/// `POST /replicate`
pub async fn handle_replicate(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(request): Json<ReplicationRequest>,
) -> Result<(StatusCode, Json<ReplicationResponse>), ApiError> {
    if request.key.is_empty() {
        return Err(ApiError::BadRequest(
            "Key and operation are required".to_string(),
        ));
    }

    coordinator.note_request();

    match request.consistency {
        Consistency::Eventual => {
            coordinator.enqueue(request)?;
            Ok((
                StatusCode::ACCEPTED,
                Json(ReplicationResponse {
                    success: true,
                    node_id: "replicator".to_string(),
                    acked_nodes: Vec::new(),
                }),
            ))
        }
        Consistency::Strong => {
            let acked_nodes = coordinator.replicate_strong(request).await?;
            Ok((
                StatusCode::OK,
                Json(ReplicationResponse {
                    success: true,
                    node_id: "replicator".to_string(),
                    acked_nodes,
                }),
            ))
        }
    }
}

/// `GET /metrics`
pub async fn handle_metrics(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<ReplicationMetrics> {
    Json(coordinator.metrics_snapshot())
}

/// `GET /health`: always 200; clients read the body's status field.
pub async fn handle_health(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<ReplicatorHealth> {
    let status = if coordinator.is_degraded() {
        "degraded"
    } else {
        "healthy"
    };
    Json(ReplicatorHealth {
        status: status.to_string(),
        service: "replicator".to_string(),
        queue_size: coordinator.queue_size(),
    })
}
