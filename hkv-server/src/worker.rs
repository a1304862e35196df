//! # Worker pool
//!
//! Each worker is one OS thread running its own single-threaded Tokio
//! runtime. The listener hands off accepted sockets across threads with a
//! bounded `tokio::sync::mpsc` channel, playing the role the original server
//! gave an OS pipe: a cheap, cross-thread wakeup that only ever carries a
//! file descriptor. The receive side is awaited rather than blocked on, so
//! the worker's executor keeps polling every connection task already
//! spawned on it between handoffs. Keeping each worker's runtime
//! single-threaded means a connection's request/response cycle never
//! bounces across cores, which keeps the per-connection state machine
//! simple and lock-free.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver, Sender};

use hkv_common::Config;
use hkv_engine::ShardStore;
use hkv_resolver::ResolverPool;

use crate::connection::handle_connection;
use crate::metrics::Metrics;

/// One accepted connection handed from the listener thread to a worker.
pub struct Accepted {
    pub stream: std::net::TcpStream,
}

pub struct WorkerPool {
    senders: Vec<Sender<Accepted>>,
    handles: Vec<JoinHandle<()>>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl WorkerPool {
    /// Spawns `count` worker threads, each with its own bounded inbox and
    /// single-threaded Tokio runtime.
    pub fn spawn(
        count: usize,
        store: Arc<ShardStore>,
        resolver: Arc<ResolverPool>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> WorkerPool {
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for idx in 0..count {
            let (tx, rx) = mpsc::channel::<Accepted>(1024);
            let store = store.clone();
            let resolver = resolver.clone();
            let config = config.clone();
            let metrics = metrics.clone();

            let handle = std::thread::Builder::new()
                .name(format!("hkv-worker-{idx}"))
                .spawn(move || worker_main(rx, store, resolver, config, metrics))
                .expect("spawn worker thread");

            senders.push(tx);
            handles.push(handle);
        }

        WorkerPool { senders, handles, cursor: std::sync::atomic::AtomicUsize::new(0) }
    }

    /// Hands one accepted connection to a worker, round-robin. Called from
    /// the listener's plain OS thread, so this uses the non-blocking
    /// `try_send` rather than the async send.
    pub fn dispatch(&self, accepted: Accepted) {
        let idx = self.cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.senders.len();
        if self.senders[idx].try_send(accepted).is_err() {
            tracing::warn!(worker = idx, "worker inbox full, dropping accepted connection");
        }
    }

    /// Drops every sender so each worker's runtime sees its channel close,
    /// then joins all worker threads.
    pub fn stop(self) {
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_main(
    mut rx: Receiver<Accepted>,
    store: Arc<ShardStore>,
    resolver: Arc<ResolverPool>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build worker runtime");

    runtime.block_on(async move {
        while let Some(accepted) = rx.recv().await {
            let stream = match accepted.stream.set_nonblocking(true).and_then(|_| TcpStream::from_std(accepted.stream)) {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "failed to adopt accepted socket into worker runtime");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            tokio::task::spawn(handle_connection(
                stream,
                store.clone(),
                resolver.clone(),
                config.clone(),
                metrics.clone(),
            ));
        }
    });
}
