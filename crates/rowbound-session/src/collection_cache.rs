//! Whole-table cache for small tables.
//!
//! Holds every row of a session's table while the table stays at or below
//! the configured ceiling. Readers get a shared snapshot; writers replace it
//! copy-on-write. Once a load or a count shows the table has outgrown the
//! ceiling the cache is retired for good and reads go straight to the
//! database.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rowbound_core::Result;

/// Hit/miss counters for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Snapshot<E> {
    rows: Arc<Vec<E>>,
    loaded_at: Instant,
}

struct CacheState<E> {
    snapshot: Option<Snapshot<E>>,
    /// Bumped by every clear so a load that raced with it is discarded.
    generation: u64,
}

pub struct CollectionCache<E> {
    state: RwLock<CacheState<E>>,
    load_lock: Mutex<()>,
    retired: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<E> Default for CollectionCache<E> {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState {
                snapshot: None,
                generation: 0,
            }),
            load_lock: Mutex::new(()),
            retired: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<E: Clone> CollectionCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn is_populated(&self) -> bool {
        self.state.read().snapshot.is_some()
    }

    /// Fresh snapshot, if any. Counts a hit or a miss.
    pub fn get(&self, expiry: Duration) -> Option<Arc<Vec<E>>> {
        let found = self.peek(expiry);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn peek(&self, expiry: Duration) -> Option<Arc<Vec<E>>> {
        let state = self.state.read();
        state
            .snapshot
            .as_ref()
            .filter(|s| s.loaded_at.elapsed() < expiry)
            .map(|s| Arc::clone(&s.rows))
    }

    /// Fresh snapshot, or load one with `loader`.
    ///
    /// Concurrent misses load once. A load returning more than `ceiling`
    /// rows retires the cache; the rows are still returned. When retired,
    /// every call runs `loader` directly.
    pub fn get_or_load(
        &self,
        expiry: Duration,
        ceiling: usize,
        loader: impl FnOnce() -> Result<Vec<E>>,
    ) -> Result<Arc<Vec<E>>> {
        if self.is_retired() {
            return loader().map(Arc::new);
        }
        if let Some(rows) = self.get(expiry) {
            return Ok(rows);
        }

        let _loading = self.load_lock.lock();
        if let Some(rows) = self.peek(expiry) {
            return Ok(rows);
        }
        let generation = self.state.read().generation;
        let rows = Arc::new(loader()?);

        if rows.len() > ceiling {
            tracing::warn!(
                rows = rows.len(),
                ceiling,
                "table outgrew the collection cache; retiring it"
            );
            self.retire();
            return Ok(rows);
        }

        let mut state = self.state.write();
        if state.generation == generation && !self.is_retired() {
            state.snapshot = Some(Snapshot {
                rows: Arc::clone(&rows),
                loaded_at: Instant::now(),
            });
            tracing::debug!(rows = rows.len(), "collection cache loaded");
        }
        Ok(rows)
    }

    /// Replace the entry matching `same` with `entity`, or append it.
    /// No-op while unpopulated.
    pub fn upsert(&self, entity: &E, same: impl Fn(&E) -> bool) {
        let mut state = self.state.write();
        if let Some(snapshot) = state.snapshot.as_mut() {
            let rows = Arc::make_mut(&mut snapshot.rows);
            match rows.iter_mut().find(|row| same(row)) {
                Some(slot) => *slot = entity.clone(),
                None => rows.push(entity.clone()),
            }
        }
    }

    /// Replace the entry matching `same` with `entity`. Never appends.
    pub fn replace(&self, entity: &E, same: impl Fn(&E) -> bool) {
        let mut state = self.state.write();
        if let Some(snapshot) = state.snapshot.as_mut() {
            if let Some(slot) = Arc::make_mut(&mut snapshot.rows).iter_mut().find(|row| same(row)) {
                *slot = entity.clone();
            }
        }
    }

    /// Remove entries matching `same`. No-op while unpopulated.
    pub fn remove(&self, same: impl Fn(&E) -> bool) {
        let mut state = self.state.write();
        if let Some(snapshot) = state.snapshot.as_mut() {
            Arc::make_mut(&mut snapshot.rows).retain(|row| !same(row));
        }
    }

    /// Drop the snapshot. Returns whether one was held.
    pub fn clear(&self) -> bool {
        let mut state = self.state.write();
        state.generation += 1;
        state.snapshot.take().is_some()
    }

    /// Stop caching for good.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .state
                .read()
                .snapshot
                .as_ref()
                .map_or(0, |s| s.rows.len()),
        }
    }
}
