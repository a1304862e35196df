//! # Shard
//!
//! One independent key space: its own `RehashingTable`, its own
//! `parking_lot::RwLock`, and two per-shard stats (`dirty`, `avg_ttl`).
//! Every method here acquires the lock it needs and releases it before
//! returning, no handler in this crate ever holds a shard lock across
//! I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;

use hkv_common::{Encoding, HashValue, HkvError, HkvResult, Value};

use crate::hashtable::{Expirable, RehashingTable};

/// Current time in epoch milliseconds, the unit the store's TTLs are kept
/// in internally (the wire protocol's `EXPIRE`/`TTL` commands operate in
/// seconds).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One shard entry: a value plus its absolute millisecond expiry, if any.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at_ms: Option<i64>,
}

impl Entry {
    pub fn new(value: Value, expires_at_ms: Option<i64>) -> Self {
        Entry { value, expires_at_ms }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

impl Expirable for Entry {
    fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }
}

/// TTL state of a key, mirroring the wire protocol's `TTL` reply encoding
/// (`-2` missing, `-1` no expiry, `>=0` seconds remaining).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

/// An independent key space protected by its own reader/writer lock.
pub struct Shard {
    table: RwLock<RehashingTable<Entry>>,
    /// Monotone count of mutations applied to this shard since startup.
    pub dirty: AtomicU64,
    /// Running average TTL (seconds) of entries installed with one. The
    /// system this is modeled on never updates this on the write path; it
    /// is kept readable for parity but nothing here writes to it either,
    /// there is no well-defined update schedule to fabricate.
    pub avg_ttl_secs: AtomicU64,
}

impl Shard {
    pub fn new() -> Self {
        Shard {
            table: RwLock::new(RehashingTable::new()),
            dirty: AtomicU64::new(0),
            avg_ttl_secs: AtomicU64::new(0),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::Relaxed);
    }

    /// Grants the rehasher direct access to the table for resize/migration.
    pub fn table(&self) -> &RwLock<RehashingTable<Entry>> {
        &self.table
    }

    // ---- string commands ---------------------------------------------

    pub fn get(&self, key: &[u8]) -> HkvResult<Option<Bytes>> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(Some(entry.value.as_string()?.clone())),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: Bytes, value: Bytes, ttl_ms: Option<i64>) -> HkvResult<()> {
        let mut table = self.table.write();
        let expires_at_ms = ttl_ms.map(|ttl| now_ms() + ttl);
        table.insert(key, Entry::new(Value::String(value), expires_at_ms));
        self.mark_dirty();
        table.maybe_start_resize();
        Ok(())
    }

    pub fn setnx(&self, key: Bytes, value: Bytes) -> HkvResult<bool> {
        let mut table = self.table.write();
        if live(&table, &key).is_some() {
            return Ok(false);
        }
        table.insert(key, Entry::new(Value::String(value), None));
        self.mark_dirty();
        table.maybe_start_resize();
        Ok(true)
    }

    pub fn append(&self, key: Bytes, suffix: Bytes) -> HkvResult<usize> {
        let mut table = self.table.write();
        let expires_at_ms = live(&table, &key).and_then(|e| e.expires_at_ms);
        let mut buf = match live(&table, &key) {
            Some(entry) => entry.value.as_string()?.to_vec(),
            None => Vec::new(),
        };
        buf.extend_from_slice(&suffix);
        let len = buf.len();
        table.insert(key, Entry::new(Value::String(Bytes::from(buf)), expires_at_ms));
        self.mark_dirty();
        table.maybe_start_resize();
        Ok(len)
    }

    pub fn strlen(&self, key: &[u8]) -> HkvResult<usize> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_string()?.len()),
            None => Ok(0),
        }
    }

    pub fn del(&self, keys: &[Bytes]) -> i64 {
        let mut table = self.table.write();
        let mut removed = 0i64;
        for key in keys {
            if let Some(entry) = table.remove(key) {
                self.mark_dirty();
                if !entry.is_expired_at(now_ms()) {
                    removed += 1;
                }
            }
        }
        table.maybe_start_resize();
        removed
    }

    pub fn exists(&self, keys: &[Bytes]) -> i64 {
        let table = self.table.read();
        keys.iter().filter(|k| live(&table, k).is_some()).count() as i64
    }

    // ---- hash commands -------------------------------------------------

    pub fn hset(
        &self,
        key: Bytes,
        field: Bytes,
        value: Bytes,
        max_entries: usize,
        max_value_len: usize,
    ) -> HkvResult<bool> {
        let mut table = self.table.write();
        let expires_at_ms = live(&table, &key).and_then(|e| e.expires_at_ms);
        let mut hash = match live(&table, &key) {
            Some(entry) => entry.value.as_hash()?.clone(),
            None => HashValue::new(),
        };
        let is_new = hash.set(field, value, max_entries, max_value_len);
        table.insert(key, Entry::new(Value::Hash(hash), expires_at_ms));
        self.mark_dirty();
        table.maybe_start_resize();
        Ok(is_new)
    }

    pub fn hsetnx(
        &self,
        key: Bytes,
        field: Bytes,
        value: Bytes,
        max_entries: usize,
        max_value_len: usize,
    ) -> HkvResult<bool> {
        {
            let table = self.table.read();
            if let Some(entry) = live(&table, &key) {
                if entry.value.as_hash()?.contains(&field) {
                    return Ok(false);
                }
            }
        }
        self.hset(key, field, value, max_entries, max_value_len)
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> HkvResult<Option<Bytes>> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_hash()?.get(field).cloned()),
            None => Ok(None),
        }
    }

    pub fn hmget(&self, key: &[u8], fields: &[Bytes]) -> HkvResult<Vec<Option<Bytes>>> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => {
                let hash = entry.value.as_hash()?;
                Ok(fields.iter().map(|f| hash.get(f).cloned()).collect())
            }
            None => Ok(vec![None; fields.len()]),
        }
    }

    pub fn hdel(&self, key: &[u8], fields: &[Bytes]) -> HkvResult<i64> {
        let mut table = self.table.write();
        let entry = match table.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now_ms()) => entry,
            _ => return Ok(0),
        };
        let hash = entry.value.as_hash_mut()?;
        let mut removed = 0i64;
        for field in fields {
            if hash.remove(field) {
                removed += 1;
            }
        }
        if removed > 0 {
            self.mark_dirty();
        }
        Ok(removed)
    }

    pub fn hlen(&self, key: &[u8]) -> HkvResult<i64> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_hash()?.len() as i64),
            None => Ok(0),
        }
    }

    pub fn hstrlen(&self, key: &[u8], field: &[u8]) -> HkvResult<i64> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_hash()?.get(field).map(|v| v.len()).unwrap_or(0) as i64),
            None => Ok(0),
        }
    }

    pub fn hkeys(&self, key: &[u8]) -> HkvResult<Vec<Bytes>> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_hash()?.iter().map(|(k, _)| k.clone()).collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn hvals(&self, key: &[u8]) -> HkvResult<Vec<Bytes>> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_hash()?.iter().map(|(_, v)| v.clone()).collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn hgetall(&self, key: &[u8]) -> HkvResult<Vec<(Bytes, Bytes)>> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry
                .value
                .as_hash()?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> HkvResult<bool> {
        let table = self.table.read();
        match live(&table, key) {
            Some(entry) => Ok(entry.value.as_hash()?.contains(field)),
            None => Ok(false),
        }
    }

    pub fn encoding(&self, key: &[u8]) -> Option<Encoding> {
        let table = self.table.read();
        live(&table, key).map(|e| e.value.encoding())
    }

    // ---- expiry ----------------------------------------------------------

    pub fn expire_secs(&self, key: &[u8], secs: u64) -> bool {
        let mut table = self.table.write();
        let Some(entry) = table.get_mut(key) else { return false };
        if entry.is_expired_at(now_ms()) {
            return false;
        }
        entry.expires_at_ms = Some(now_ms() + secs as i64 * 1000);
        self.mark_dirty();
        true
    }

    pub fn ttl(&self, key: &[u8]) -> TtlStatus {
        let table = self.table.read();
        let Some(entry) = live(&table, key) else { return TtlStatus::Missing };
        match entry.expires_at_ms {
            None => TtlStatus::NoExpiry,
            Some(at) => {
                let remaining_ms = (at - now_ms()).max(0) as u64;
                TtlStatus::ExpiresIn(Duration::from_millis(remaining_ms))
            }
        }
    }

    /// Installs a backfilled value with a fixed TTL, bypassing command-level
    /// validation, used only by the async miss resolver's installation
    /// path.
    pub fn install_backfill(&self, key: Bytes, value: Value, ttl_ms: i64) {
        let mut table = self.table.write();
        table.insert(key, Entry::new(value, Some(now_ms() + ttl_ms)));
        self.mark_dirty();
        table.maybe_start_resize();
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}

fn live<'a>(table: &'a RehashingTable<Entry>, key: &[u8]) -> Option<&'a Entry> {
    table.get(key).filter(|e| !e.is_expired_at(now_ms()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let shard = Shard::new();
        shard.set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), None).unwrap();
        assert_eq!(shard.get(b"foo").unwrap().unwrap(), Bytes::from_static(b"bar"));
    }

    #[test]
    fn setnx_only_inserts_once() {
        let shard = Shard::new();
        assert!(shard.setnx(Bytes::from_static(b"k"), Bytes::from_static(b"v1")).unwrap());
        assert!(!shard.setnx(Bytes::from_static(b"k"), Bytes::from_static(b"v2")).unwrap());
        assert_eq!(shard.get(b"k").unwrap().unwrap(), Bytes::from_static(b"v1"));
    }

    #[test]
    fn append_extends_existing_value() {
        let shard = Shard::new();
        shard.set(Bytes::from_static(b"k"), Bytes::from_static(b"Hello "), None).unwrap();
        let len = shard.append(Bytes::from_static(b"k"), Bytes::from_static(b"World")).unwrap();
        assert_eq!(len, 11);
        assert_eq!(shard.get(b"k").unwrap().unwrap(), Bytes::from_static(b"Hello World"));
    }

    #[test]
    fn expire_and_ttl_round_trip() {
        let shard = Shard::new();
        shard.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), None).unwrap();
        assert_eq!(shard.ttl(b"k"), TtlStatus::NoExpiry);
        assert!(shard.expire_secs(b"k", 10));
        match shard.ttl(b"k") {
            TtlStatus::ExpiresIn(d) => assert!(d.as_secs() <= 10),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ttl_expiry_hides_value_without_removing_eagerly() {
        let shard = Shard::new();
        shard.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), Some(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(shard.get(b"k").unwrap(), None);
        assert_eq!(shard.ttl(b"k"), TtlStatus::Missing);
    }

    #[test]
    fn del_counts_only_live_keys() {
        let shard = Shard::new();
        shard.set(Bytes::from_static(b"a"), Bytes::from_static(b"1"), None).unwrap();
        let removed = shard.del(&[Bytes::from_static(b"a"), Bytes::from_static(b"missing")]);
        assert_eq!(removed, 1);
    }

    #[test]
    fn hash_roundtrip_and_conversion() {
        let shard = Shard::new();
        assert!(shard.hset(Bytes::from_static(b"h"), Bytes::from_static(b"f1"), Bytes::from_static(b"v1"), 128, 64).unwrap());
        assert!(!shard.hset(Bytes::from_static(b"h"), Bytes::from_static(b"f1"), Bytes::from_static(b"v2"), 128, 64).unwrap());
        assert_eq!(shard.hget(b"h", b"f1").unwrap().unwrap(), Bytes::from_static(b"v2"));
        assert_eq!(shard.hlen(b"h").unwrap(), 1);
        assert!(shard.hexists(b"h", b"f1").unwrap());
        assert_eq!(shard.hdel(b"h", &[Bytes::from_static(b"f1")]).unwrap(), 1);
        assert!(!shard.hexists(b"h", b"f1").unwrap());
    }

    #[test]
    fn wrong_type_surfaces_on_mismatched_command() {
        let shard = Shard::new();
        shard.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), None).unwrap();
        assert_eq!(shard.hget(b"k", b"f").unwrap_err(), HkvError::WrongType);
    }

    #[test]
    fn install_backfill_sets_ttl() {
        let shard = Shard::new();
        shard.install_backfill(Bytes::from_static(b"k"), Value::String(Bytes::from_static(b"v")), 7 * 24 * 60 * 60 * 1000);
        match shard.ttl(b"k") {
            TtlStatus::ExpiresIn(d) => assert!(d.as_secs() > 6 * 24 * 60 * 60),
            other => panic!("unexpected {other:?}"),
        }
    }
}
