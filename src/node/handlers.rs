//! Storage Node API Handlers
//!
//! HTTP endpoints exposing one node's store to the gateway and the
//! replication coordinator. These translate requests into calls on
//! [`StorageNode`] and map failures onto the API error taxonomy.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Path, Query};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Response};
use axum::Json;

use crate::config;
use crate::error::ApiError;

use super::protocol::{NodeHealth, NodeMetrics, StoreQuery, StoreResponse};
use super::service::StorageNode;

/// `PUT /store/:key?ttl=<duration>`: stores the raw request body.
pub async fn handle_put(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(key): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StoreResponse>, ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }

    // Replicated writes are marked by the coordinator; the marker is
    // advisory and must not change semantics.
    if headers.contains_key("X-Replication") {
        tracing::debug!(key = %key, "applying replicated write");
    }

    let ttl = query.ttl.as_deref().and_then(config::parse_duration);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    node.set(&key, body.to_vec(), content_type, ttl)
        .await
        .map_err(|e| {
            tracing::error!(key = %key, error = %e, "WAL append failed");
            ApiError::Internal("Failed to write to WAL".to_string())
        })?;

    Ok(Json(StoreResponse {
        success: true,
        key,
        node_id: node.node_id.clone(),
    }))
}

/// `GET /store/:key`: returns the stored bytes verbatim, 404 when the key
/// is absent or expired.
pub async fn handle_get(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(key): Path<String>,
) -> Result<Response<Body>, ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }

    let entry = node
        .get(&key)
        .await
        .ok_or_else(|| ApiError::NotFound("Key not found".to_string()))?;

    let content_type = entry
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    let mut response = Response::new(Body::from(entry.value));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    if let Ok(node_id) = HeaderValue::from_str(&node.node_id) {
        response.headers_mut().insert("X-Node-ID", node_id);
    }
    Ok(response)
}

/// `DELETE /store/:key`: removes the key, 404 when it was absent.
pub async fn handle_delete(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(key): Path<String>,
) -> Result<Json<StoreResponse>, ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }

    let removed = node.delete(&key).await.map_err(|e| {
        tracing::error!(key = %key, error = %e, "WAL append failed");
        ApiError::Internal("Failed to write to WAL".to_string())
    })?;

    if !removed {
        return Err(ApiError::NotFound("Key not found".to_string()));
    }

    Ok(Json(StoreResponse {
        success: true,
        key,
        node_id: node.node_id.clone(),
    }))
}

/// `GET /metrics`
pub async fn handle_metrics(
    Extension(node): Extension<Arc<StorageNode>>,
) -> Json<NodeMetrics> {
    let stats = node.stats().await;
    Json(NodeMetrics {
        node_id: node.node_id.clone(),
        key_count: stats.key_count,
        wal_size_bytes: stats.wal_size_bytes,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    })
}

/// `GET /health`
pub async fn handle_health(
    Extension(node): Extension<Arc<StorageNode>>,
) -> Json<NodeHealth> {
    Json(NodeHealth {
        status: "healthy".to_string(),
        node_id: node.node_id.clone(),
    })
}
