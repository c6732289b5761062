//! Gateway API Handlers
//!
//! Orchestration of client operations: resolve the responsible nodes from
//! the ring, perform the primary write or read, then trigger replication
//! with the requested consistency. Primary failures are forwarded to the
//! client verbatim rather than rewrapped.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Path, Query};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::config::{format_duration, parse_duration};
use crate::error::ApiError;
use crate::replication::protocol::{Consistency, Operation, ReplicationRequest};
use crate::ring::DEFAULT_REPLICAS;

use super::middleware::UserId;
use super::protocol::{GatewayHealth, KvWriteResponse, TtlQuery};
use super::GatewayState;

/// Timeout for calls to a storage node.
const PRIMARY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the synchronous replication call; strictly more than the
/// coordinator's own strong-mode deadline, so its 408 arrives here intact.
const COORDINATOR_TIMEOUT: Duration = Duration::from_secs(15);

/// `PUT /v1/kv/:key?ttl=<duration>`
pub async fn handle_put(
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(key): Path<String>,
    Query(query): Query<TtlQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }
    let consistency = consistency_from(&headers)?;
    // An unparseable TTL is treated as "no TTL" for wire compatibility.
    let ttl = query.ttl.as_deref().and_then(parse_duration);

    let nodes = state.ring.locate(&key, DEFAULT_REPLICAS);
    if nodes.is_empty() {
        return Err(ApiError::Unavailable("No nodes available".to_string()));
    }
    let primary_node = nodes[0].clone();
    let replica_nodes = nodes[1..].to_vec();

    tracing::info!(
        key = %key,
        primary = %primary_node,
        replicas = replica_nodes.len(),
        user_id,
        consistency = consistency.as_str(),
        "put"
    );

    let mut request = state
        .http_client
        .put(format!("{}/store/{}", primary_node, key))
        .header("X-User-ID", user_id.to_string())
        .timeout(PRIMARY_TIMEOUT)
        .body(body.clone());
    if let Some(ttl) = ttl {
        request = request.query(&[("ttl", format_duration(ttl))]);
    }
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        request = request.header(CONTENT_TYPE, content_type.as_bytes());
    }

    let response = request.send().await.map_err(|e| {
        tracing::error!(key = %key, primary = %primary_node, error = %e, "primary write failed");
        ApiError::Unavailable("Primary node unavailable".to_string())
    })?;

    // A failed primary write is the client's answer; do not replicate.
    if !response.status().is_success() {
        return Ok(proxy_response(response).await);
    }

    if !replica_nodes.is_empty() {
        let replication = ReplicationRequest {
            key: key.clone(),
            value: Some(body.to_vec()),
            operation: Operation::Set,
            ttl_ns: ttl.map(|ttl| ttl.as_nanos() as u64),
            consistency,
            primary_node: primary_node.clone(),
            replica_nodes: replica_nodes.clone(),
            user_id,
        };
        if let Some(failure) = trigger_replication(&state, replication).await? {
            return Ok(failure);
        }
    }

    Ok(Json(KvWriteResponse {
        success: true,
        key,
        primary_node,
        replicas: replica_nodes.len(),
    })
    .into_response())
}

/// `GET /v1/kv/:key`: forwarded to whichever node the ring currently names
/// primary; the node's status, body and content type pass through verbatim.
pub async fn handle_get(
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }
    let consistency = consistency_from(&headers)?;

    let primary_node = state
        .ring
        .primary(&key)
        .ok_or_else(|| ApiError::Unavailable("No nodes available".to_string()))?;

    tracing::info!(key = %key, node = %primary_node, user_id, "get");

    let response = state
        .http_client
        .get(format!("{}/store/{}", primary_node, key))
        .header("X-User-ID", user_id.to_string())
        .header("X-Consistency", consistency.as_str())
        .timeout(PRIMARY_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(key = %key, node = %primary_node, error = %e, "read failed");
            ApiError::Unavailable("Storage node unavailable".to_string())
        })?;

    Ok(proxy_response(response).await)
}

/// `DELETE /v1/kv/:key`
pub async fn handle_delete(
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }
    let consistency = consistency_from(&headers)?;

    let nodes = state.ring.locate(&key, DEFAULT_REPLICAS);
    if nodes.is_empty() {
        return Err(ApiError::Unavailable("No nodes available".to_string()));
    }
    let primary_node = nodes[0].clone();
    let replica_nodes = nodes[1..].to_vec();

    tracing::info!(
        key = %key,
        primary = %primary_node,
        replicas = replica_nodes.len(),
        user_id,
        consistency = consistency.as_str(),
        "delete"
    );

    let response = state
        .http_client
        .delete(format!("{}/store/{}", primary_node, key))
        .header("X-User-ID", user_id.to_string())
        .timeout(PRIMARY_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(key = %key, primary = %primary_node, error = %e, "primary delete failed");
            ApiError::Unavailable("Primary node unavailable".to_string())
        })?;

    // 404 from the primary still replicates: the delete must reach replicas
    // that may hold an older copy of the key.
    let status = response.status();
    if !status.is_success() && status.as_u16() != 404 {
        return Ok(proxy_response(response).await);
    }

    if !replica_nodes.is_empty() {
        let replication = ReplicationRequest {
            key: key.clone(),
            value: None,
            operation: Operation::Delete,
            ttl_ns: None,
            consistency,
            primary_node: primary_node.clone(),
            replica_nodes: replica_nodes.clone(),
            user_id,
        };
        if let Some(failure) = trigger_replication(&state, replication).await? {
            return Ok(failure);
        }
    }

    Ok(Json(KvWriteResponse {
        success: true,
        key,
        primary_node,
        replicas: replica_nodes.len(),
    })
    .into_response())
}

/// `GET /health`: reachable without credentials.
pub async fn handle_health(
    Extension(state): Extension<Arc<GatewayState>>,
) -> Json<GatewayHealth> {
    Json(GatewayHealth {
        status: "healthy".to_string(),
        service: "gateway".to_string(),
        nodes: state.ring.all_nodes(),
    })
}

/// Reads the consistency header; absent or empty means eventual.
pub(crate) fn consistency_from(headers: &HeaderMap) -> Result<Consistency, ApiError> {
    match headers
        .get("X-Consistency")
        .map(|value| value.to_str().unwrap_or_default())
    {
        None | Some("") | Some("eventual") => Ok(Consistency::Eventual),
        Some("strong") => Ok(Consistency::Strong),
        Some(_) => Err(ApiError::BadRequest(
            "Invalid consistency level. Must be 'strong' or 'eventual'".to_string(),
        )),
    }
}

/// Dispatches a replication descriptor to the coordinator.
///
/// Eventual mode fires and forgets: the client response never waits, and a
/// coordinator hiccup only degrades replica freshness until the next write.
/// Strong mode waits; a coordinator failure becomes the client's response,
/// returned as `Some(response)`.
async fn trigger_replication(
    state: &Arc<GatewayState>,
    request: ReplicationRequest,
) -> Result<Option<Response>, ApiError> {
    match request.consistency {
        Consistency::Eventual => {
            let state = state.clone();
            tokio::spawn(async move {
                let result = state
                    .http_client
                    .post(state.replicator_url())
                    .json(&request)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => tracing::warn!(
                        key = %request.key,
                        status = %response.status(),
                        "replication request rejected"
                    ),
                    Err(e) => tracing::warn!(
                        key = %request.key,
                        error = %e,
                        "failed to trigger replication"
                    ),
                }
            });
            Ok(None)
        }
        Consistency::Strong => {
            let response = state
                .http_client
                .post(state.replicator_url())
                .json(&request)
                .timeout(COORDINATOR_TIMEOUT)
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(key = %request.key, error = %e, "replication coordinator unreachable");
                    ApiError::Unavailable("Replication coordinator unavailable".to_string())
                })?;

            if response.status().is_success() {
                Ok(None)
            } else {
                // The primary holds the data, but replica durability is
                // unconfirmed; the coordinator's verdict goes to the client.
                Ok(Some(proxy_response(response).await))
            }
        }
    }
}

/// Rebuilds a downstream response (status, content type, body) as our own.
async fn proxy_response(response: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| HeaderValue::from_bytes(value.as_bytes()).ok());
    let node_id = response
        .headers()
        .get("X-Node-ID")
        .and_then(|value| HeaderValue::from_bytes(value.as_bytes()).ok());
    let body = response.bytes().await.unwrap_or_default();

    let mut out = Response::new(Body::from(body));
    *out.status_mut() = status;
    if let Some(content_type) = content_type {
        out.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    if let Some(node_id) = node_id {
        out.headers_mut().insert("X-Node-ID", node_id);
    }
    out
}
