//! # Value objects
//!
//! Every shard entry is a `Value`: a type tag (string or hash) plus an
//! encoding hint and payload. Rust's `Arc` gives us the cheap, shared,
//! reference-counted ownership a reply-assembly path needs, so there is no
//! hand-rolled refcounting here, a `GET` clones an `Arc<Bytes>`, not the
//! underlying bytes. Small integers and the common
//! reply prefixes are likewise not manually interned: they have no heap
//! allocation to share in the first place, so "share it once at startup"
//! buys nothing a plain `Bytes::from_static` reply chunk doesn't already
//! give us (see `hkv-common::resp`).

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{HkvError, HkvResult};

/// Default entry-count threshold above which a hash converts to table
/// encoding. Mirrors the classic `hash-max-ziplist-entries` knob.
pub const DEFAULT_HASH_MAX_ENTRIES: usize = 128;

/// Default per-value byte-length threshold above which a hash converts to
/// table encoding, regardless of entry count.
pub const DEFAULT_HASH_MAX_VALUE_LEN: usize = 64;

/// Coarse type tag, used for `WRONGTYPE` checks before a handler touches the
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Hash,
}

/// Encoding hint carried alongside the payload. Only the hash encodings
/// affect observable behavior (compact-list vs. hash-table, tested by
/// invariant 5); the string encodings are informational, matching the
/// `int`/`embstr`/`raw` hints the original server reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Int,
    EmbeddedString,
    RawString,
    HashCompact,
    HashTable,
}

/// A hash value in one of two encodings. Conversion is one-way and eager:
/// once a hash crosses either threshold it never converts back, even if
/// entries are later removed.
#[derive(Debug, Clone)]
pub enum HashValue {
    /// Small hashes: a flat vector of pairs, linearly scanned. Compact and
    /// fast for the handful of fields most hashes actually have.
    Compact(Vec<(Bytes, Bytes)>),
    /// Hashes that outgrew the compact thresholds.
    Table(HashMap<Bytes, Bytes>),
}

impl HashValue {
    pub fn new() -> Self {
        HashValue::Compact(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            HashValue::Compact(v) => v.len(),
            HashValue::Table(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, field: &[u8]) -> Option<&Bytes> {
        match self {
            HashValue::Compact(v) => v.iter().find(|(k, _)| k.as_ref() == field).map(|(_, v)| v),
            HashValue::Table(m) => m.get(field),
        }
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.get(field).is_some()
    }

    /// Inserts or replaces `field`, returning `true` if the field was newly
    /// inserted (matches `HSET`'s return-count semantics). Converts to table
    /// encoding eagerly when either threshold is crossed by this write.
    pub fn set(
        &mut self,
        field: Bytes,
        value: Bytes,
        max_entries: usize,
        max_value_len: usize,
    ) -> bool {
        let is_new = match self {
            HashValue::Compact(v) => {
                match v.iter_mut().find(|(k, _)| *k == field) {
                    Some(slot) => {
                        slot.1 = value.clone();
                        false
                    }
                    None => {
                        v.push((field.clone(), value.clone()));
                        true
                    }
                }
            }
            HashValue::Table(m) => m.insert(field.clone(), value.clone()).is_none(),
        };

        self.convert_if_needed(max_entries, max_value_len, &value);
        is_new
    }

    fn convert_if_needed(&mut self, max_entries: usize, max_value_len: usize, last_value: &Bytes) {
        if let HashValue::Compact(v) = self {
            let needs_convert = v.len() > max_entries || last_value.len() > max_value_len;
            if needs_convert {
                let map: HashMap<Bytes, Bytes> = v.drain(..).collect();
                *self = HashValue::Table(map);
            }
        }
    }

    /// Removes `field`, returning `true` if it existed. Conversion never
    /// reverses on delete, once a hash goes to table encoding it stays there.
    pub fn remove(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Compact(v) => {
                let before = v.len();
                v.retain(|(k, _)| k.as_ref() != field);
                v.len() != before
            }
            HashValue::Table(m) => m.remove(field).is_some(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (&Bytes, &Bytes)> + '_> {
        match self {
            HashValue::Compact(v) => Box::new(v.iter().map(|(k, v)| (k, v))),
            HashValue::Table(m) => Box::new(m.iter()),
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            HashValue::Compact(_) => Encoding::HashCompact,
            HashValue::Table(_) => Encoding::HashTable,
        }
    }
}

impl Default for HashValue {
    fn default() -> Self {
        HashValue::new()
    }
}

/// The payload stored in a shard entry, shared by `Arc` once inserted.
#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    Hash(HashValue),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Hash(_) => ValueKind::Hash,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Value::String(bytes) => string_encoding(bytes),
            Value::Hash(hash) => hash.encoding(),
        }
    }

    pub fn as_string(&self) -> HkvResult<&Bytes> {
        match self {
            Value::String(bytes) => Ok(bytes),
            Value::Hash(_) => Err(HkvError::WrongType),
        }
    }

    pub fn as_hash(&self) -> HkvResult<&HashValue> {
        match self {
            Value::Hash(hash) => Ok(hash),
            Value::String(_) => Err(HkvError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> HkvResult<&mut HashValue> {
        match self {
            Value::Hash(hash) => Ok(hash),
            Value::String(_) => Err(HkvError::WrongType),
        }
    }
}

/// Cheap encoding hint for a string value: small ASCII integers are `int`,
/// short strings are `embstr`, everything else is `raw`. Purely informational
/// (surfaced nowhere in the command set this core implements), but kept as
/// part of the value object for diagnostics and future `OBJECT ENCODING`-style
/// introspection.
fn string_encoding(bytes: &Bytes) -> Encoding {
    const EMBSTR_MAX: usize = 44;
    if bytes.len() <= 20 && !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_digit()) {
        if std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .is_some()
        {
            return Encoding::Int;
        }
    }
    if bytes.len() <= EMBSTR_MAX {
        Encoding::EmbeddedString
    } else {
        Encoding::RawString
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_stays_compact_under_thresholds() {
        let mut h = HashValue::new();
        h.set(Bytes::from_static(b"f1"), Bytes::from_static(b"v1"), 4, 16);
        h.set(Bytes::from_static(b"f2"), Bytes::from_static(b"v2"), 4, 16);
        assert_eq!(h.encoding(), Encoding::HashCompact);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn hash_converts_on_entry_count() {
        let mut h = HashValue::new();
        for i in 0..6u8 {
            h.set(
                Bytes::from(vec![i]),
                Bytes::from_static(b"v"),
                4,
                16,
            );
        }
        assert_eq!(h.encoding(), Encoding::HashTable);
    }

    #[test]
    fn hash_converts_on_value_length_and_never_reverts() {
        let mut h = HashValue::new();
        h.set(Bytes::from_static(b"f1"), Bytes::from(vec![0u8; 32]), 128, 16);
        assert_eq!(h.encoding(), Encoding::HashTable);
        h.remove(b"f1");
        assert_eq!(h.encoding(), Encoding::HashTable);
    }

    #[test]
    fn hset_reports_new_vs_replace() {
        let mut h = HashValue::new();
        assert!(h.set(Bytes::from_static(b"f1"), Bytes::from_static(b"v1"), 128, 64));
        assert!(!h.set(Bytes::from_static(b"f1"), Bytes::from_static(b"v2"), 128, 64));
        assert_eq!(h.get(b"f1").unwrap().as_ref(), b"v2");
    }

    #[test]
    fn wrong_type_on_mismatched_access() {
        let v = Value::String(Bytes::from_static(b"x"));
        assert_eq!(v.as_hash().unwrap_err(), HkvError::WrongType);
    }
}
