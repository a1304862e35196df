//! # hkv-engine
//!
//! The sharded in-memory store: `NUM_SLOTS` independent data shards plus one
//! admin shard, each behind its own reader/writer lock and each owning an
//! incrementally-rehashing hash table (see [`hashtable::RehashingTable`]).
//! [`ShardStore`] is the entry point handlers in `hkv-server` route through;
//! [`rehasher`] is the background thread that keeps resizes amortized even
//! when writes stop arriving.

pub mod hashtable;
pub mod rehasher;
pub mod shard;
pub mod store;

pub use hashtable::{Expirable, LoadStats, RehashingTable};
pub use rehasher::{spawn_rehasher, RehasherHandle};
pub use shard::{now_ms, Entry, Shard, TtlStatus};
pub use store::ShardStore;
