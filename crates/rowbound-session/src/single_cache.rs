//! Per-key entity cache.
//!
//! Entries expire individually. The cache is bounded: when full, an insert
//! first sweeps expired entries and, if that frees nothing, is skipped
//! rather than evicting a live entry.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rowbound_core::Value;

use crate::collection_cache::CacheStats;

/// Primary key values used as a cache key.
///
/// Integer widths compare and hash alike, so a key built from an `Int`
/// finds an entry stored under the equal `BigInt`.
#[derive(Debug, Clone)]
pub struct CacheKey(Vec<Value>);

impl CacheKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for CacheKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| key_eq(a, b))
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            hash_value(value, state);
        }
    }
}

fn key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a.loosely_eq(b),
    }
}

fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    match v {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
            2u8.hash(state);
            v.as_i64().hash(state);
        }
        Value::Double(f) => {
            3u8.hash(state);
            f.to_bits().hash(state);
        }
        Value::Decimal(s) => {
            4u8.hash(state);
            s.hash(state);
        }
        Value::Text(s) => {
            5u8.hash(state);
            s.hash(state);
        }
        Value::Bytes(b) => {
            6u8.hash(state);
            b.hash(state);
        }
        Value::Timestamp(t) => {
            7u8.hash(state);
            t.hash(state);
        }
        Value::Uuid(u) => {
            8u8.hash(state);
            u.hash(state);
        }
        Value::Json(j) => {
            9u8.hash(state);
            j.to_string().hash(state);
        }
    }
}

struct Entry<E> {
    entity: E,
    expires_at: Instant,
}

pub struct SingleCache<E> {
    entries: DashMap<CacheKey, Entry<E>>,
    hits: AtomicU64,
    misses: AtomicU64,
    skipped: AtomicU64,
}

impl<E> Default for SingleCache<E> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }
}

impl<E: Clone> SingleCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entry for `key`. Expired entries are dropped on the way.
    pub fn get(&self, key: &CacheKey) -> Option<E> {
        let found = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.entity.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match found {
            Some(entity) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entity)
            }
            None => {
                self.entries
                    .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `entity`. Returns false when the cache is full of live entries.
    pub fn insert(&self, key: CacheKey, entity: E, ttl: Duration, max_entries: usize) -> bool {
        if self.entries.len() >= max_entries
            && !self.entries.contains_key(&key)
            && (self.sweep_expired() == 0 || self.entries.len() >= max_entries)
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(max_entries, "single cache full; entry not cached");
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                entity,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    /// Overwrite an existing entry, keeping its key. Returns whether one existed.
    pub fn replace_if_present(&self, key: &CacheKey, entity: &E, ttl: Duration) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.entity = entity.clone();
                entry.expires_at = Instant::now() + ttl;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Inserts refused because the cache was full.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
