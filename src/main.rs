// =============================================================================
// rugfeed-core — Main Entry Point
// =============================================================================
//
// Boots the store connection, compiles the schema registry, wires the
// upstream consumer into the router and broadcaster, and serves the REST +
// WebSocket surface. Shutdown is cooperative: every long-running task
// listens on the same broadcast channel rather than being aborted.
// =============================================================================

mod api;
mod app_state;
mod broadcaster;
mod config;
mod errors;
mod inbound;
mod metrics;
mod outbound;
mod persistence;
mod prng;
mod router;
mod schema;
mod state_tracker;
mod types;
mod upstream;
mod verifier;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broadcaster::Broadcaster;
use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use crate::persistence::{Store, WorkerPool};
use crate::router::Router;
use crate::schema::SchemaRegistry;
use crate::upstream::Liveness;

const PERSISTENCE_WORKERS: usize = 4;
const PERSISTENCE_QUEUE_DEPTH: usize = 2_048;
const RAW_FRAME_QUEUE_DEPTH: usize = 4_096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("rugfeed-core starting up");

    let config = Arc::new(ServiceConfig::load()?);

    let store = Arc::new(Store::connect(&config).await?);
    store.provision_indexes().await?;
    info!("store connected and indexes provisioned");

    let schemas = Arc::new(SchemaRegistry::compile()?);
    let metrics = Arc::new(Metrics::default());
    let broadcaster = Arc::new(Broadcaster::new());
    let liveness = Arc::new(Liveness::default());
    let persistence = Arc::new(WorkerPool::spawn(store.clone(), PERSISTENCE_WORKERS, PERSISTENCE_QUEUE_DEPTH));
    let router = Arc::new(Router::new(schemas.clone(), persistence.clone(), broadcaster.clone(), metrics.clone()));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // ── Upstream consumer ────────────────────────────────────────────────
    let raw_queue = Arc::new(upstream::consumer::RawFrameQueue::new(RAW_FRAME_QUEUE_DEPTH));
    let (connection_tx, mut connection_rx) = tokio::sync::mpsc::channel(64);

    {
        let url = config.rugs_upstream_url.clone();
        let max_reconnects = config.upstream_max_reconnects;
        let queue = raw_queue.clone();
        let metrics = metrics.clone();
        let liveness = liveness.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(upstream::run_consumer(url, max_reconnects, queue, metrics, liveness, connection_tx, shutdown));
    }

    {
        let persistence = persistence.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = connection_rx.recv() => {
                        persistence.submit(crate::persistence::Job::ConnectionEvent(event)).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    // ── Router drain loop ────────────────────────────────────────────────
    {
        let router = router.clone();
        let queue = raw_queue.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(router.run(queue, shutdown));
    }

    // ── Broadcaster heartbeat ────────────────────────────────────────────
    broadcaster::spawn_heartbeat(broadcaster.clone(), metrics.clone(), shutdown_tx.subscribe());

    // ── HTTP server ──────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        config: config.clone(),
        schemas,
        metrics,
        router,
        broadcaster,
        store,
        persistence,
        liveness,
    });

    let app = api::rest::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
    info!(addr = %config.listen_address, "HTTP server listening");

    let server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        let mut server_shutdown = server_shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());

    if let Err(e) = tokio::time::timeout(config.shutdown_drain, server).await {
        error!(error = %e, "HTTP server did not shut down within the drain window");
    }

    info!("rugfeed-core shut down complete");
    Ok(())
}
