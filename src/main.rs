use std::future::IntoFuture;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::Extension;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use distributed_kv::config::Config;
use distributed_kv::gateway::identity::{HttpIdentityProvider, LogUsageSink};
use distributed_kv::gateway::{self, GatewayState};
use distributed_kv::node::{self, StorageNode};
use distributed_kv::replication::{self, Coordinator};

/// How long in-flight connections get to finish after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut service = std::env::var("SERVICE").ok();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--service" if i + 1 < args.len() => {
                service = Some(args[i + 1].clone());
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(service) = service else {
        eprintln!("Usage: {} --service <gateway|node|replicator>", args[0]);
        eprintln!("Example: {} --service gateway", args[0]);
        eprintln!("Example: NODE_ID=node-2 DHTNODE_PORT=8083 {} --service node", args[0]);
        std::process::exit(1);
    };

    let config = Config::load();

    match service.as_str() {
        "gateway" => run_gateway(config).await,
        "node" => run_node(config).await,
        "replicator" => run_replicator(config).await,
        other => {
            eprintln!("Unknown service: {} (expected gateway, node or replicator)", other);
            std::process::exit(1);
        }
    }
}

async fn run_gateway(config: Config) -> Result<()> {
    let port = config.gateway_port;
    let identity = Arc::new(HttpIdentityProvider::new(format!(
        "http://localhost:{}",
        config.usermanager_port
    )));

    let state = GatewayState::new(config, identity, Arc::new(LogUsageSink));
    tracing::info!(
        nodes = state.ring.all_nodes().len(),
        "hash ring initialized"
    );
    state.spawn_bucket_sweeper();

    let app = Router::new()
        .route(
            "/v1/kv/:key",
            put(gateway::handlers::handle_put)
                .get(gateway::handlers::handle_get)
                .delete(gateway::handlers::handle_delete),
        )
        .route("/health", get(gateway::handlers::handle_health))
        .layer(axum::middleware::from_fn(gateway::middleware::auth))
        .layer(axum::middleware::from_fn(gateway::middleware::cors))
        .layer(axum::middleware::from_fn(gateway::middleware::logging))
        .layer(Extension(state));

    let listener = bind(port).await?;
    tracing::info!(port, "gateway service listening");
    serve_with_drain(listener, app).await
}

async fn run_node(config: Config) -> Result<()> {
    let node = StorageNode::open(&config.node_id, Path::new(&config.data_dir))
        .context("failed to initialize WAL")?;
    node.spawn_reaper();

    let app = Router::new()
        .route(
            "/store/:key",
            put(node::handlers::handle_put)
                .get(node::handlers::handle_get)
                .delete(node::handlers::handle_delete),
        )
        .route("/metrics", get(node::handlers::handle_metrics))
        .route("/health", get(node::handlers::handle_health))
        .layer(axum::middleware::from_fn(gateway::middleware::logging))
        .layer(Extension(node.clone()));

    let listener = bind(config.node_port).await?;
    tracing::info!(node_id = %node.node_id, port = config.node_port, "storage node listening");
    let result = serve_with_drain(listener, app).await;

    // Quiet moment to rewrite the log from the live snapshot, so the next
    // boot replays only what still matters.
    if let Err(e) = node.compact().await {
        tracing::warn!(error = %e, "WAL compaction on shutdown failed");
    }
    result
}

async fn run_replicator(config: Config) -> Result<()> {
    let coordinator = Coordinator::start();

    let app = Router::new()
        .route("/replicate", post(replication::handlers::handle_replicate))
        .route("/metrics", get(replication::handlers::handle_metrics))
        .route("/health", get(replication::handlers::handle_health))
        .layer(axum::middleware::from_fn(gateway::middleware::logging))
        .layer(Extension(coordinator.clone()));

    let listener = bind(config.replicator_port).await?;
    tracing::info!(port = config.replicator_port, "replicator service listening");
    let result = serve_with_drain(listener, app).await;

    // Workers finish their current task; the queue is not drained.
    coordinator.shutdown();
    result
}

async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))
}

/// Serves until a termination signal arrives, then drains connections for at
/// most [`SHUTDOWN_DRAIN`] before giving up on stragglers.
async fn serve_with_drain(listener: TcpListener, app: Router) -> Result<()> {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!("shutting down");
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_DRAIN, server).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("drain window elapsed before all connections closed"),
    }

    tracing::info!("server exited gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
