mod config;
mod error;
mod health;
mod http;
mod listener;
mod payment;
mod pool;
mod queue;
mod store;
mod upstream;
mod worker_pool;

use crate::config::Config;
use crate::health::HealthBroadcaster;
use crate::http::AppState;
use crate::listener::{Connection, Listener};
use crate::payment::Job;
use crate::pool::Pool;
use crate::queue::IngestQueue;
use crate::store::Store;
use crate::upstream::UpstreamClient;
use crate::worker_pool::WorkerDeps;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use std::sync::Arc;
use std::time::Duration;

/// `GOMAXPROCS` is the reference lineage's name for "how many OS threads
/// may the scheduler use"; tokio's multi-thread runtime doesn't read it
/// automatically, so it's honored explicitly here as `worker_threads`.
fn main() {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    let gomaxprocs = std::env::var("GOMAXPROCS").ok().and_then(|v| v.parse::<usize>().ok());
    if let Some(n) = gomaxprocs.filter(|&n| n > 0) {
        builder.worker_threads(n);
    }
    builder
        .build()
        .expect("building the tokio runtime")
        .block_on(run());
}

async fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let health = HealthBroadcaster::new();
    let store = Arc::new(Store::new(config.postgres_url.clone(), config.postgres_pool_size));
    // The database may still be coming up alongside this process (e.g. in
    // a compose stack started concurrently); retry for a while before
    // treating it as a hard startup failure, consistent with the
    // not-cached-on-failure pool init in store.rs.
    const SCHEMA_INIT_ATTEMPTS: u32 = 30;
    let mut last_err = None;
    for attempt in 1..=SCHEMA_INIT_ATTEMPTS {
        match store.init_schema().await {
            Ok(()) => {
                last_err = None;
                break;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "database not ready yet, retrying");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    if let Some(e) = last_err {
        tracing::error!(error = %e, "failed to initialize database schema after retrying");
        std::process::exit(1);
    }

    let upstream = Arc::new(UpstreamClient::new(
        config.default_processor_url.clone(),
        config.fallback_processor_url.clone(),
        config.upstream_timeout_ms,
    ));

    // `queue_capacity` is the ingest queue's total bound; split evenly
    // across the per-worker channels the sharded queue is built from,
    // rather than giving each worker its own full-sized channel.
    let per_worker_capacity = (config.queue_capacity / config.num_workers).max(1);
    let (queue, receivers) = IngestQueue::new(config.num_workers, per_worker_capacity);
    worker_pool::spawn_workers(
        receivers,
        WorkerDeps {
            upstream: upstream.clone(),
            store: store.clone(),
            health: health.clone(),
        },
    );

    let job_pool = Arc::new(Pool::new(config.queue_capacity, Job::default));
    let state = Arc::new(AppState {
        job_pool,
        queue,
        store: store.clone(),
        settle_delay: Duration::from_millis(config.settle_delay_ms),
    });

    let listener = match Listener::bind(&config.listen).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    loop {
        let conn = match listener.accept().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };

        let state = state.clone();
        let service = service_fn(move |req| http::route(req, state.clone()));

        tokio::spawn(async move {
            let result = match conn {
                Connection::Tcp(io) => http1::Builder::new().serve_connection(io, service).await,
                Connection::Unix(io) => http1::Builder::new().serve_connection(io, service).await,
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "connection ended with error");
            }
        });
    }
}

