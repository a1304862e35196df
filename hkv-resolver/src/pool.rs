//! # Resolver pool
//!
//! A fixed pool of resolver threads, each owning a bounded queue of
//! [`MissTask`]s, sharing one [`SingleFlightFilter`], a document-store
//! handle, a presence-check handle, and the shard store tasks install
//! their results into.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use hkv_common::{crc16, key_hash_slot, Value};
use hkv_engine::{now_ms, ShardStore};

use crate::collaborators::{DocumentStore, Presence, PresenceCheck};
use crate::filter::SingleFlightFilter;
use crate::schema;
use crate::task::{MissTask, TaskKey, TaskType};

#[derive(Debug, Clone)]
pub struct ResolverPoolConfig {
    pub num_resolvers: usize,
    pub queue_depth: usize,
    pub backfill_ttl_ms: i64,
}

impl Default for ResolverPoolConfig {
    fn default() -> Self {
        ResolverPoolConfig {
            num_resolvers: 4,
            queue_depth: 1024,
            backfill_ttl_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Result of a `push_task` submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    DuplicateSuppressed,
    QueueFull,
}

pub struct ResolverPool {
    filter: Arc<SingleFlightFilter>,
    senders: Vec<Sender<MissTask>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    cursor: AtomicUsize,
}

impl ResolverPool {
    pub fn spawn(
        config: ResolverPoolConfig,
        store: Arc<ShardStore>,
        document_store: Arc<dyn DocumentStore>,
        presence: Arc<dyn PresenceCheck>,
    ) -> ResolverPool {
        let filter = Arc::new(SingleFlightFilter::new());
        let stop = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(config.num_resolvers);
        let mut handles = Vec::with_capacity(config.num_resolvers);

        for idx in 0..config.num_resolvers {
            let (tx, rx) = crossbeam_channel::bounded::<MissTask>(config.queue_depth);
            senders.push(tx);

            let store = store.clone();
            let document_store = document_store.clone();
            let presence = presence.clone();
            let filter = filter.clone();
            let stop = stop.clone();
            let ttl_ms = config.backfill_ttl_ms;

            let handle = thread::Builder::new()
                .name(format!("hkv-resolver-{idx}"))
                .spawn(move || resolver_loop(rx, filter, document_store, presence, store, ttl_ms, stop))
                .expect("failed to spawn resolver thread");
            handles.push(handle);
        }

        ResolverPool { filter, senders, stop, handles, cursor: AtomicUsize::new(0) }
    }

    /// Submits a miss-task key. Computes the CRC-16 fingerprint, checks
    /// and sets the single-flight bit, picks the shortest queue by a
    /// rotating-start linear probe, and enqueues. Clears the bit again if
    /// the chosen queue turns out to be full.
    pub fn push_task(&self, key: Bytes) -> PushOutcome {
        let fingerprint = crc16(&key);
        if self.filter.test_and_set(fingerprint) {
            return PushOutcome::DuplicateSuppressed;
        }

        let idx = self.pick_resolver();
        let task = MissTask::new(now_ms(), key);
        match self.senders[idx].try_send(task) {
            Ok(()) => PushOutcome::Enqueued,
            Err(_) => {
                self.filter.clear(fingerprint);
                PushOutcome::QueueFull
            }
        }
    }

    fn pick_resolver(&self) -> usize {
        let n = self.senders.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        let mut best = start;
        let mut best_len = self.senders[start].len();
        if best_len == 0 {
            return best;
        }

        for offset in 1..n {
            let idx = (start + offset) % n;
            let len = self.senders[idx].len();
            if len == 0 {
                return idx;
            }
            if len < best_len {
                best = idx;
                best_len = len;
            }
        }
        best
    }

    /// Signals every resolver thread to stop once its current drain
    /// finishes, joins them, and resets the single-flight filter.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles {
            let _ = handle.join();
        }
        self.filter.clear_all();
    }
}

fn resolver_loop(
    rx: Receiver<MissTask>,
    filter: Arc<SingleFlightFilter>,
    document_store: Arc<dyn DocumentStore>,
    presence: Arc<dyn PresenceCheck>,
    store: Arc<ShardStore>,
    ttl_ms: i64,
    stop: Arc<AtomicBool>,
) {
    loop {
        match rx.recv_timeout(Duration::from_millis(10)) {
            Ok(task) => {
                exec_task(&task, &filter, document_store.as_ref(), presence.as_ref(), store.as_ref(), ttl_ms);
                while let Ok(task) = rx.try_recv() {
                    exec_task(&task, &filter, document_store.as_ref(), presence.as_ref(), store.as_ref(), ttl_ms);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if stop.load(Ordering::Acquire) && rx.is_empty() {
            break;
        }
    }
}

/// A bit is always cleared when this guard drops, regardless of which
/// return path `exec_task` takes, mirroring the requirement that every
/// exit from task execution, success or failure, clears the single-flight
/// bit for its fingerprint.
struct ClearFilterOnDrop<'a> {
    filter: &'a SingleFlightFilter,
    fingerprint: u16,
}

impl Drop for ClearFilterOnDrop<'_> {
    fn drop(&mut self) {
        self.filter.clear(self.fingerprint);
    }
}

fn exec_task(
    task: &MissTask,
    filter: &SingleFlightFilter,
    document_store: &dyn DocumentStore,
    presence: &dyn PresenceCheck,
    store: &ShardStore,
    ttl_ms: i64,
) {
    let fingerprint = crc16(&task.key);
    let _clear = ClearFilterOnDrop { filter, fingerprint };

    let parsed = match TaskKey::parse(&task.key) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(error = %err, "miss task key failed to parse");
            return;
        }
    };

    match presence.exists(&parsed.uid) {
        Ok(Presence::Present) => {}
        Ok(Presence::Absent) => return,
        Err(err) => {
            tracing::warn!(error = %err, uid = %parsed.uid, "presence probe failed");
            return;
        }
    }

    let root = schema::root_field(parsed.task_type);
    let projection = schema::projection_for(parsed.task_type, parsed.param.as_deref());

    let document = match document_store.query_one(&parsed.uid, &projection) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(error = %err, uid = %parsed.uid, "document store query failed");
            return;
        }
    };

    let shaped = match document {
        None => serde_json::json!({}),
        Some(doc) => match parsed.task_type {
            TaskType::Category | TaskType::Tag => {
                let name = parsed.param.as_deref().unwrap_or_default();
                match schema::decode_weighted_entry(&doc, root, name) {
                    Some(entry) => schema::shape_weighted(&entry),
                    None => {
                        tracing::warn!(uid = %parsed.uid, "document failed schema checks");
                        serde_json::json!({})
                    }
                }
            }
            TaskType::CategoryStat | TaskType::TagStat => schema::shape_stat(&doc, root),
        },
    };

    let slot = key_hash_slot(&task.key);
    let encoded = match serde_json::to_vec(&shaped) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode projection");
            return;
        }
    };
    store
        .shard(slot)
        .install_backfill(task.key.clone(), Value::String(Bytes::from(encoded)), ttl_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubDocumentStore {
        documents: HashMap<String, serde_json::Value>,
    }

    impl DocumentStore for StubDocumentStore {
        fn query_one(
            &self,
            uid: &str,
            _projection: &[String],
        ) -> crate::error::ResolverResult<Option<serde_json::Value>> {
            Ok(self.documents.get(uid).cloned())
        }
    }

    struct AlwaysPresent;
    impl PresenceCheck for AlwaysPresent {
        fn exists(&self, _uid: &str) -> crate::error::ResolverResult<Presence> {
            Ok(Presence::Present)
        }
    }

    struct StubDocumentStoreLog {
        inner: StubDocumentStore,
        calls: Mutex<Vec<String>>,
    }

    impl DocumentStore for StubDocumentStoreLog {
        fn query_one(
            &self,
            uid: &str,
            projection: &[String],
        ) -> crate::error::ResolverResult<Option<serde_json::Value>> {
            self.calls.lock().unwrap().push(uid.to_string());
            self.inner.query_one(uid, projection)
        }
    }

    #[test]
    fn end_to_end_category_backfill_installs_into_store() {
        let mut documents = HashMap::new();
        documents.insert(
            "u1".to_string(),
            serde_json::json!({ "category": { "c1": { "ts": 100, "w": [{"k": "a", "v": 1.5}] } } }),
        );

        let store = Arc::new(ShardStore::new());
        let pool = ResolverPool::spawn(
            ResolverPoolConfig { num_resolvers: 2, queue_depth: 16, backfill_ttl_ms: 1_000 },
            store.clone(),
            Arc::new(StubDocumentStore { documents }),
            Arc::new(AlwaysPresent),
        );

        let key = Bytes::from_static(b"category&&u1&&c1");
        assert_eq!(pool.push_task(key.clone()), PushOutcome::Enqueued);

        let slot = key_hash_slot(&key);
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        let mut installed = None;
        while std::time::Instant::now() < deadline {
            if let Ok(Some(bytes)) = store.shard(slot).get(&key) {
                installed = Some(bytes);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let bytes = installed.expect("backfill should have installed a value");
        let shaped: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(shaped["ts"], serde_json::json!(100));
        assert_eq!(shaped["weighted"][0]["tag"], serde_json::json!("a"));

        pool.stop();
    }

    #[test]
    fn backfill_installs_into_the_hash_tagged_shard_a_lookup_would_use() {
        let mut documents = HashMap::new();
        documents.insert(
            "{u1}".to_string(),
            serde_json::json!({ "category": { "c1": { "ts": 100, "w": [{"k": "a", "v": 1.5}] } } }),
        );

        let store = Arc::new(ShardStore::new());
        let pool = ResolverPool::spawn(
            ResolverPoolConfig { num_resolvers: 1, queue_depth: 16, backfill_ttl_ms: 1_000 },
            store.clone(),
            Arc::new(StubDocumentStore { documents }),
            Arc::new(AlwaysPresent),
        );

        // A hash tag that is not the whole key: the slot a lookup routes to
        // (`ShardStore::slot_for_key`, which honors `{tag}`) must be the same
        // slot the backfill installs into, or the value is written to a
        // shard GET never looks at.
        let key = Bytes::from_static(b"category&&{u1}&&c1");
        assert_eq!(pool.push_task(key.clone()), PushOutcome::Enqueued);

        let lookup_slot = ShardStore::slot_for_key(&key);
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        let mut installed = None;
        while std::time::Instant::now() < deadline {
            if let Ok(Some(bytes)) = store.shard(lookup_slot).get(&key) {
                installed = Some(bytes);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let bytes = installed.expect("backfill should be visible on the slot a GET would route to");
        let shaped: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(shaped["ts"], serde_json::json!(100));

        pool.stop();
    }

    #[test]
    fn duplicate_submission_is_suppressed_while_in_flight() {
        let store = Arc::new(ShardStore::new());
        let pool = ResolverPool::spawn(
            ResolverPoolConfig { num_resolvers: 1, queue_depth: 1, backfill_ttl_ms: 1_000 },
            store,
            Arc::new(StubDocumentStore { documents: HashMap::new() }),
            Arc::new(AlwaysPresent),
        );

        let key = Bytes::from_static(b"category_stat&&u9");
        let first = pool.push_task(key.clone());
        let second = pool.push_task(key.clone());
        assert_eq!(first, PushOutcome::Enqueued);
        assert_eq!(second, PushOutcome::DuplicateSuppressed);

        pool.stop();
    }

    #[test]
    fn absent_uid_skips_document_store_query() {
        struct NeverPresent;
        impl PresenceCheck for NeverPresent {
            fn exists(&self, _uid: &str) -> crate::error::ResolverResult<Presence> {
                Ok(Presence::Absent)
            }
        }

        let store = Arc::new(ShardStore::new());
        let log_store = Arc::new(StubDocumentStoreLog {
            inner: StubDocumentStore { documents: HashMap::new() },
            calls: Mutex::new(Vec::new()),
        });
        let pool = ResolverPool::spawn(
            ResolverPoolConfig { num_resolvers: 1, queue_depth: 4, backfill_ttl_ms: 1_000 },
            store,
            log_store.clone(),
            Arc::new(NeverPresent),
        );

        pool.push_task(Bytes::from_static(b"tag&&ghost&&t1"));
        thread::sleep(Duration::from_millis(50));
        pool.stop();

        assert!(log_store.calls.lock().unwrap().is_empty());
    }
}
