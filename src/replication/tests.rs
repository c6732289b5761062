use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::routing::put;
use axum::{Json, Router};

use crate::error::ApiError;

use super::coordinator::{Coordinator, QUEUE_CAPACITY};
use super::handlers::handle_replicate;
use super::protocol::{Consistency, Operation, ReplicationRequest};

// ============================================================
// STUB STORAGE NODE
// ============================================================

struct StubNode {
    hits: AtomicUsize,
    puts: Mutex<Vec<(String, Vec<u8>, Option<String>)>>,
    deletes: Mutex<Vec<String>>,
    /// Requests to fail (with `fail_status`) before succeeding.
    fail_remaining: AtomicI64,
    fail_status: StatusCode,
}

async fn stub_put(
    Extension(stub): Extension<Arc<StubNode>>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> StatusCode {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    if stub.fail_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
        return stub.fail_status;
    }
    stub.puts
        .lock()
        .unwrap()
        .push((key, body.to_vec(), query.get("ttl").cloned()));
    StatusCode::OK
}

async fn stub_delete(
    Extension(stub): Extension<Arc<StubNode>>,
    Path(key): Path<String>,
) -> StatusCode {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    if stub.fail_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
        return stub.fail_status;
    }
    stub.deletes.lock().unwrap().push(key);
    StatusCode::OK
}

async fn spawn_stub_node(fail_remaining: i64, fail_status: StatusCode) -> (String, Arc<StubNode>) {
    let stub = Arc::new(StubNode {
        hits: AtomicUsize::new(0),
        puts: Mutex::new(Vec::new()),
        deletes: Mutex::new(Vec::new()),
        fail_remaining: AtomicI64::new(fail_remaining),
        fail_status,
    });

    let app = Router::new()
        .route("/store/:key", put(stub_put).delete(stub_delete))
        .layer(Extension(stub.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());

    (format!("http://{}", addr), stub)
}

/// An address nothing listens on.
async fn dead_node_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn set_request(replicas: Vec<String>, consistency: Consistency) -> ReplicationRequest {
    ReplicationRequest {
        key: "foo".to_string(),
        value: Some(b"bar".to_vec()),
        operation: Operation::Set,
        ttl_ns: None,
        consistency,
        primary_node: "http://primary.invalid".to_string(),
        replica_nodes: replicas,
        user_id: 7,
    }
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

// ============================================================
// EVENTUAL MODE
// ============================================================

#[tokio::test]
async fn test_eventual_replication_reaches_all_replicas() {
    let (url_a, stub_a) = spawn_stub_node(0, StatusCode::OK).await;
    let (url_b, stub_b) = spawn_stub_node(0, StatusCode::OK).await;

    let coordinator = Coordinator::start();
    let mut request = set_request(vec![url_a, url_b], Consistency::Eventual);
    request.ttl_ns = Some(Duration::from_secs(60).as_nanos() as u64);
    coordinator.enqueue(request).unwrap();

    let delivered = wait_until(Duration::from_secs(2), || {
        stub_a.puts.lock().unwrap().len() == 1 && stub_b.puts.lock().unwrap().len() == 1
    })
    .await;
    assert!(delivered, "both replicas should receive the write");

    let puts = stub_a.puts.lock().unwrap();
    let (key, body, ttl) = &puts[0];
    assert_eq!(key, "foo");
    assert_eq!(body, b"bar");
    assert_eq!(ttl.as_deref(), Some("1m"));
    drop(puts);

    let metrics = coordinator.metrics_snapshot();
    assert_eq!(metrics.successful_replicas, 2);
    assert_eq!(metrics.failed_replicas, 0);
}

#[tokio::test]
async fn test_eventual_delete_is_replicated() {
    let (url, stub) = spawn_stub_node(0, StatusCode::OK).await;

    let coordinator = Coordinator::start();
    let request = ReplicationRequest {
        key: "foo".to_string(),
        value: None,
        operation: Operation::Delete,
        ttl_ns: None,
        consistency: Consistency::Eventual,
        primary_node: "http://primary.invalid".to_string(),
        replica_nodes: vec![url],
        user_id: 7,
    };
    coordinator.enqueue(request).unwrap();

    let delivered =
        wait_until(Duration::from_secs(2), || stub.deletes.lock().unwrap().len() == 1).await;
    assert!(delivered);
    assert_eq!(stub.deletes.lock().unwrap()[0], "foo");
}

#[tokio::test]
async fn test_full_queue_rejects_immediately() {
    // No workers: nothing drains the queue.
    let coordinator = Coordinator::start_with_workers(0);

    for _ in 0..QUEUE_CAPACITY {
        coordinator
            .enqueue(set_request(vec!["http://replica.invalid".to_string()], Consistency::Eventual))
            .unwrap();
    }

    let err = coordinator
        .enqueue(set_request(vec!["http://replica.invalid".to_string()], Consistency::Eventual))
        .unwrap_err();
    assert!(matches!(err, ApiError::Unavailable(_)));
    assert_eq!(coordinator.queue_size(), QUEUE_CAPACITY);
}

#[tokio::test]
async fn test_health_degrades_when_queue_backs_up() {
    let coordinator = Coordinator::start_with_workers(0);
    assert!(!coordinator.is_degraded());

    for _ in 0..QUEUE_CAPACITY * 9 / 10 {
        coordinator
            .enqueue(set_request(vec!["http://replica.invalid".to_string()], Consistency::Eventual))
            .unwrap();
    }
    assert!(coordinator.is_degraded());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    // First call fails with 500, the retry succeeds.
    let (url, stub) = spawn_stub_node(1, StatusCode::INTERNAL_SERVER_ERROR).await;

    let coordinator = Coordinator::start();
    coordinator
        .enqueue(set_request(vec![url], Consistency::Eventual))
        .unwrap();

    // Retry fires after attempts * 2s = 2s.
    let delivered =
        wait_until(Duration::from_secs(5), || stub.puts.lock().unwrap().len() == 1).await;
    assert!(delivered, "write should land after one retry");

    let metrics = coordinator.metrics_snapshot();
    assert_eq!(metrics.failed_replicas, 1);
    assert_eq!(metrics.successful_replicas, 1);
    assert_eq!(metrics.retries_in_progress, 0);
}

#[tokio::test]
async fn test_rejected_write_is_not_retried() {
    let (url, stub) = spawn_stub_node(i64::MAX, StatusCode::BAD_REQUEST).await;

    let coordinator = Coordinator::start();
    coordinator
        .enqueue(set_request(vec![url], Consistency::Eventual))
        .unwrap();

    let attempted = wait_until(Duration::from_secs(2), || {
        stub.hits.load(Ordering::SeqCst) >= 1
    })
    .await;
    assert!(attempted);

    // Past the first retry window: a 4xx must not have been retried.
    tokio::time::sleep(Duration::from_millis(2600)).await;
    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);

    let metrics = coordinator.metrics_snapshot();
    assert_eq!(metrics.permanent_failures, 1);
    assert_eq!(metrics.retries_in_progress, 0);
}

// ============================================================
// STRONG MODE
// ============================================================

#[tokio::test]
async fn test_strong_mode_acks_on_majority() {
    let (url_a, _stub_a) = spawn_stub_node(0, StatusCode::OK).await;
    let (url_b, _stub_b) = spawn_stub_node(0, StatusCode::OK).await;

    let coordinator = Coordinator::start();
    let acked = coordinator
        .replicate_strong(set_request(vec![url_a, url_b], Consistency::Strong))
        .await
        .unwrap();

    // Majority of 2 replicas is 2.
    assert_eq!(acked.len(), 2);
}

#[tokio::test]
async fn test_strong_mode_fails_without_quorum() {
    let (url_ok, _stub) = spawn_stub_node(0, StatusCode::OK).await;
    let url_dead = dead_node_url().await;

    let coordinator = Coordinator::start();
    let err = coordinator
        .replicate_strong(set_request(vec![url_ok, url_dead], Consistency::Strong))
        .await
        .unwrap_err();

    // Both replicas responded (one refused), quorum of 2 not met.
    assert!(matches!(err, ApiError::Internal(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_strong_requests_never_enter_the_queue() {
    let (url_a, _stub_a) = spawn_stub_node(0, StatusCode::OK).await;

    let coordinator = Coordinator::start_with_workers(0);
    let (status, response) = handle_replicate(
        Extension(coordinator.clone()),
        Json(set_request(vec![url_a], Consistency::Strong)),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(response.success);
    assert_eq!(response.acked_nodes.len(), 1);
    assert_eq!(coordinator.queue_size(), 0);
}

// ============================================================
// HANDLER SURFACE
// ============================================================

#[tokio::test]
async fn test_eventual_request_is_accepted() {
    let coordinator = Coordinator::start_with_workers(0);
    let (status, response) = handle_replicate(
        Extension(coordinator.clone()),
        Json(set_request(vec!["http://replica.invalid".to_string()], Consistency::Eventual)),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(response.success);
    assert_eq!(coordinator.queue_size(), 1);
    assert_eq!(coordinator.metrics_snapshot().total_replications, 1);
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let coordinator = Coordinator::start_with_workers(0);
    let mut request = set_request(vec!["http://replica.invalid".to_string()], Consistency::Eventual);
    request.key = String::new();

    let err = handle_replicate(Extension(coordinator), Json(request))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[test]
fn test_request_wire_shape() {
    // Consistency defaults to eventual when the field is missing.
    let request: ReplicationRequest = serde_json::from_str(
        r#"{
            "key": "foo",
            "value": [98, 97, 114],
            "operation": "SET",
            "ttl": 60000000000,
            "primary_node": "http://localhost:8082",
            "replica_nodes": ["http://localhost:8083"],
            "user_id": 7
        }"#,
    )
    .unwrap();

    assert_eq!(request.consistency, Consistency::Eventual);
    assert_eq!(request.operation, Operation::Set);
    assert_eq!(request.ttl_ns, Some(60_000_000_000));
    assert_eq!(request.value.as_deref(), Some(b"bar".as_slice()));
}
