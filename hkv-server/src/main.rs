//! Binary entry point: reads configuration from the environment, brings up
//! the store, rehasher, resolver pool, worker pool, and listener, then
//! blocks until a shutdown signal arrives and tears everything down in the
//! order the concurrency model requires, listener first (stop accepting),
//! then workers (drain in-flight connections), then the rehasher, then the
//! resolver pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hkv_common::Config;
use hkv_engine::{spawn_rehasher, ShardStore};
use hkv_resolver::{ClientPresenceCheck, MongoDocumentStore, ResolverPool, ResolverPoolConfig};
use hkv_server::listener::spawn_listener;
use hkv_server::metrics::Metrics;
use hkv_server::worker::WorkerPool;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::from_env());
    tracing::info!(bind_addr = %config.bind_addr, worker_threads = config.worker_threads, "starting hkv-server");

    let store = Arc::new(ShardStore::new());
    let metrics = Arc::new(Metrics::new());

    let rehasher = spawn_rehasher(
        store.clone(),
        Duration::from_millis(config.rehash_tick_ms),
        Duration::from_micros(config.rehash_budget_us),
    );

    let document_store = Arc::new(MongoDocumentStore::connect(
        &config.mongo_uri,
        &config.mongo_database,
        &config.mongo_collection,
    )?);
    let presence_client = hkv_client::KVClient::with_config(hkv_client::ClientConfig {
        addr: config.presence_addr.clone(),
        read_timeout: Some(Duration::from_millis(config.presence_timeout_ms)),
        write_timeout: Some(Duration::from_millis(config.presence_timeout_ms)),
        connect_timeout: Some(Duration::from_millis(config.presence_timeout_ms)),
        ..Default::default()
    })?;
    let presence = Arc::new(ClientPresenceCheck::new(presence_client));

    let resolver = Arc::new(ResolverPool::spawn(
        ResolverPoolConfig {
            num_resolvers: config.resolver_threads,
            queue_depth: config.resolver_queue_depth,
            backfill_ttl_ms: config.backfill_ttl_secs as i64 * 1000,
        },
        store.clone(),
        document_store,
        presence,
    ));

    let workers = Arc::new(WorkerPool::spawn(
        config.worker_threads,
        store.clone(),
        resolver.clone(),
        config.clone(),
        metrics.clone(),
    ));

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = spawn_listener(addr, workers.clone())?;
    tracing::info!(addr = %listener.local_addr(), "listening");

    wait_for_ctrl_c();

    tracing::info!("shutting down");
    listener.stop();
    match Arc::try_unwrap(workers) {
        Ok(workers) => workers.stop(),
        Err(_) => tracing::warn!("worker pool still referenced at shutdown, skipping drain join"),
    }
    rehasher.stop();
    match Arc::try_unwrap(resolver) {
        Ok(resolver) => resolver.stop(),
        Err(_) => tracing::warn!("resolver pool still referenced at shutdown, skipping drain join"),
    }

    Ok(())
}

/// Blocks the main thread until `SIGINT` (or an equivalent Ctrl-C event on
/// Windows) arrives. Spins up a tiny current-thread runtime just for this,
/// none of the server's own async work runs on it.
fn wait_for_ctrl_c() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build shutdown-signal runtime");
    runtime.block_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });
}
