//! Integration tests driving a real listener/worker-pool/dispatch stack over
//! a loopback socket, using the pooled sync client the same way an external
//! caller would. The resolver pool runs against in-process stub
//! collaborators so these tests never touch a real MongoDB instance.

use std::sync::Arc;

use hkv_client::{ClientConfig, ClientTtl, KVClient};
use hkv_common::Config;
use hkv_engine::ShardStore;
use hkv_resolver::{DocumentStore, Presence, PresenceCheck, ResolverPool, ResolverPoolConfig, ResolverResult};
use hkv_server::listener::spawn_listener;
use hkv_server::metrics::Metrics;
use hkv_server::worker::WorkerPool;

struct NoDocuments;

impl DocumentStore for NoDocuments {
    fn query_one(&self, _uid: &str, _projection: &[String]) -> ResolverResult<Option<serde_json::Value>> {
        Ok(None)
    }
}

struct NeverPresent;

impl PresenceCheck for NeverPresent {
    fn exists(&self, _uid: &str) -> ResolverResult<Presence> {
        Ok(Presence::Absent)
    }
}

struct RunningServer {
    client: KVClient,
    listener: Option<hkv_server::listener::ListenerHandle>,
    workers: Option<Arc<WorkerPool>>,
    resolver: Option<Arc<ResolverPool>>,
}

impl RunningServer {
    fn start() -> Self {
        let config = Arc::new(Config::default());
        let store = Arc::new(ShardStore::new());
        let metrics = Arc::new(Metrics::new());

        let resolver = Arc::new(ResolverPool::spawn(
            ResolverPoolConfig { num_resolvers: 1, queue_depth: 16, backfill_ttl_ms: 1000 },
            store.clone(),
            Arc::new(NoDocuments),
            Arc::new(NeverPresent),
        ));

        let workers = Arc::new(WorkerPool::spawn(2, store, resolver.clone(), config, metrics));

        let addr = "127.0.0.1:0".parse().unwrap();
        let listener = spawn_listener(addr, workers.clone()).expect("bind loopback listener");
        let bound = listener.local_addr();

        let client = KVClient::with_config(ClientConfig { addr: bound.to_string(), ..Default::default() })
            .expect("connect client");

        RunningServer { client, listener: Some(listener), workers: Some(workers), resolver: Some(resolver) }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        if let Some(workers) = self.workers.take() {
            if let Ok(workers) = Arc::try_unwrap(workers) {
                workers.stop();
            }
        }
        if let Some(resolver) = self.resolver.take() {
            if let Ok(resolver) = Arc::try_unwrap(resolver) {
                resolver.stop();
            }
        }
    }
}

#[test]
fn set_then_get_round_trips_over_the_wire() {
    let server = RunningServer::start();

    server.client.set(b"greeting", b"hello").expect("set");
    let value = server.client.get(b"greeting").expect("get");
    assert_eq!(value.as_deref(), Some(b"hello".as_slice()));
}

#[test]
fn missing_key_returns_none() {
    let server = RunningServer::start();
    let value = server.client.get(b"nope").expect("get");
    assert_eq!(value, None);
}

#[test]
fn expire_and_ttl_agree() {
    let server = RunningServer::start();

    server.client.set(b"session", b"token").expect("set");
    let ttl = server.client.ttl(b"session").expect("ttl");
    assert_eq!(ttl, ClientTtl::NoExpiry);

    let changed = server.client.expire(b"session", std::time::Duration::from_secs(30)).expect("expire");
    assert!(changed);
    match server.client.ttl(b"session").expect("ttl") {
        ClientTtl::ExpiresIn(remaining) => assert!(remaining.as_secs() <= 30),
        other => panic!("unexpected ttl {other:?}"),
    }
}

#[test]
fn delete_removes_the_key() {
    let server = RunningServer::start();

    server.client.set(b"doomed", b"value").expect("set");
    let removed = server.client.delete(b"doomed").expect("delete");
    assert!(removed);
    assert_eq!(server.client.get(b"doomed").expect("get"), None);
}

#[test]
fn pipelined_requests_are_each_answered_in_order() {
    let server = RunningServer::start();

    for i in 0..50 {
        let key = format!("k{i}");
        let value = format!("v{i}");
        server.client.set(key.as_bytes(), value.as_bytes()).expect("set");
    }
    for i in 0..50 {
        let key = format!("k{i}");
        let expected = format!("v{i}");
        let got = server.client.get(key.as_bytes()).expect("get");
        assert_eq!(got.as_deref(), Some(expected.as_bytes()));
    }
}
