//! # Background rehasher
//!
//! Every tick (default 2s), sweeps all shards: starts a resize where the
//! load factor warrants it, and spends up to a fixed budget per shard
//! (default 1ms) advancing any migration already in progress. Growth also
//! happens opportunistically on every write (`RehashingTable::insert`/
//! `remove` each perform one migration step), so pausing this thread slows
//! rehashing but never stalls it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::store::ShardStore;

/// Handle to the background rehasher thread; dropping it without calling
/// [`stop`](RehasherHandle::stop) leaves the thread running (it only exits
/// once told to).
pub struct RehasherHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RehasherHandle {
    /// Signals the thread to stop and joins it. Idempotent-safe to call at
    /// most once; fits the shutdown order of listener, then workers, then
    /// rehasher, then resolvers.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns the background rehasher thread. `tick` is the sleep between
/// sweeps; `budget_per_shard` bounds migration work performed per shard per
/// tick.
pub fn spawn_rehasher(
    store: Arc<ShardStore>,
    tick: Duration,
    budget_per_shard: Duration,
) -> RehasherHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop);

    let join = std::thread::Builder::new()
        .name("hkv-rehasher".into())
        .spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(tick);
                if stop_thread.load(Ordering::Acquire) {
                    break;
                }
                sweep(&store, budget_per_shard);
            }
        })
        .expect("spawn rehasher thread");

    RehasherHandle { stop, join: Some(join) }
}

/// One pass over every shard. Briefly takes each shard's write lock, either
/// to check whether a resize should start or to advance an in-progress
/// migration for up to `budget_per_shard`.
fn sweep(store: &ShardStore, budget_per_shard: Duration) {
    for shard in store.shards() {
        let mut table = shard.table().write();
        if !table.is_rehashing() {
            table.maybe_start_resize();
            continue;
        }
        let deadline = Instant::now() + budget_per_shard;
        while table.is_rehashing() && Instant::now() < deadline {
            table.migrate_step(1);
        }
    }
}
