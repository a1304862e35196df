//! # Shard store
//!
//! The fixed array of `NUM_SLOTS` data shards (default 16384) plus one
//! admin shard at `ADMIN_SLOT` (0x4000). This type's only job is slot
//! routing; every read/write/lock decision lives on [`crate::Shard`]
//! itself, one per slot.

use std::sync::atomic::{AtomicU64, Ordering};

use hkv_common::{key_hash_slot, ADMIN_SLOT, NUM_SLOTS};

use crate::shard::Shard;

pub struct ShardStore {
    shards: Vec<Shard>,
    /// Coarse running estimate of bytes held across all shards, grown on
    /// writes and shrunk on deletes. Not reconciled against overwrites or
    /// expiry, so it trends high rather than exact, enough to gate
    /// `deny_oom` commands without an expensive precise accounting pass.
    approx_bytes: AtomicU64,
}

impl ShardStore {
    pub fn new() -> Self {
        let total = NUM_SLOTS as usize + 1;
        let mut shards = Vec::with_capacity(total);
        shards.resize_with(total, Shard::new);
        ShardStore { shards, approx_bytes: AtomicU64::new(0) }
    }

    pub fn approx_memory_bytes(&self) -> u64 {
        self.approx_bytes.load(Ordering::Relaxed)
    }

    pub fn add_approx_bytes(&self, delta: u64) {
        self.approx_bytes.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn sub_approx_bytes(&self, delta: u64) {
        let _ = self.approx_bytes.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some(current.saturating_sub(delta))
        });
    }

    /// Total number of shards, including the admin shard.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The slot a data key routes to, honoring `{tag}` hash tags.
    pub fn slot_for_key(key: &[u8]) -> u16 {
        key_hash_slot(key)
    }

    pub fn shard(&self, slot: u16) -> &Shard {
        &self.shards[slot as usize]
    }

    pub fn admin_shard(&self) -> &Shard {
        &self.shards[ADMIN_SLOT as usize]
    }

    /// All shards, in slot order, used by the rehasher's sweep and by
    /// diagnostics; never by the request path.
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }
}

impl Default for ShardStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_count_includes_admin_shard() {
        let store = ShardStore::new();
        assert_eq!(store.len(), NUM_SLOTS as usize + 1);
    }

    #[test]
    fn hash_tagged_keys_route_to_same_shard() {
        let a = ShardStore::slot_for_key(b"{user1}.following");
        let b = ShardStore::slot_for_key(b"{user1}.followers");
        assert_eq!(a, b);
    }

    #[test]
    fn routing_and_storage_round_trip() {
        let store = ShardStore::new();
        let key = b"hello";
        let slot = ShardStore::slot_for_key(key);
        let shard = store.shard(slot);
        shard.set(bytes::Bytes::from_static(key), bytes::Bytes::from_static(b"world"), None).unwrap();
        assert_eq!(shard.get(key).unwrap().unwrap(), bytes::Bytes::from_static(b"world"));
    }
}
