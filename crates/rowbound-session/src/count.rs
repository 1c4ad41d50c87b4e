//! Cached record count of a session's table.

use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy)]
struct Captured {
    value: i64,
    at: Instant,
}

/// Record count with two freshness regimes.
///
/// At or below the exact ceiling the count is always fresh and follows
/// every typed insert and delete. Above it the count is a snapshot that
/// lives for the configured TTL and is not adjusted.
#[derive(Debug, Default)]
struct CountState {
    captured: Option<Captured>,
    /// Bumped by every adjust and reset, so a count computed across one
    /// is not stored over it.
    generation: u64,
}

#[derive(Debug, Default)]
pub struct RecordCount {
    state: Mutex<CountState>,
    computing: Mutex<()>,
}

impl RecordCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached count, if still usable.
    pub fn fresh(&self, exact_ceiling: i64, ttl: Duration) -> Option<i64> {
        let captured = self.state.lock().captured?;
        if captured.value <= exact_ceiling || captured.at.elapsed() < ttl {
            Some(captured.value)
        } else {
            None
        }
    }

    /// Cached count regardless of age.
    pub fn peek(&self) -> Option<i64> {
        self.state.lock().captured.map(|c| c.value)
    }

    /// Marker to pass to [`store_since`](Self::store_since) once a count
    /// computed after this call is available.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn store(&self, value: i64) {
        self.state.lock().captured = Some(Captured {
            value: value.max(0),
            at: Instant::now(),
        });
    }

    /// Store `value` unless a write adjusted or reset the count after
    /// `generation` was read. Returns whether it was stored.
    pub fn store_since(&self, value: i64, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.captured = Some(Captured {
            value: value.max(0),
            at: Instant::now(),
        });
        true
    }

    /// Apply a typed insert (`+1`) or delete (`-1`). Counts above the exact
    /// ceiling, and unknown counts, are left alone.
    pub fn adjust(&self, delta: i64, exact_ceiling: i64) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(c) = state.captured.as_mut() {
            if c.value <= exact_ceiling {
                c.value = (c.value + delta).max(0);
            }
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.captured = None;
    }

    /// Forget the count only if it is in the exact regime.
    pub fn reset_exact(&self, exact_ceiling: i64) {
        let mut state = self.state.lock();
        state.generation += 1;
        if state.captured.is_some_and(|c| c.value <= exact_ceiling) {
            state.captured = None;
        }
    }

    /// Serializes computation so concurrent first reads count once.
    pub(crate) fn computing(&self) -> MutexGuard<'_, ()> {
        self.computing.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    #[test]
    fn test_unknown_until_stored() {
        let count = RecordCount::new();
        assert_eq!(count.fresh(100, TTL), None);
        count.adjust(1, 100);
        assert_eq!(count.peek(), None);
        count.store(5);
        assert_eq!(count.fresh(100, TTL), Some(5));
    }

    #[test]
    fn test_exact_regime_follows_writes() {
        let count = RecordCount::new();
        count.store(10);
        count.adjust(1, 100);
        count.adjust(1, 100);
        count.adjust(-1, 100);
        assert_eq!(count.fresh(100, TTL), Some(11));

        count.store(0);
        count.adjust(-1, 100);
        assert_eq!(count.peek(), Some(0));
    }

    #[test]
    fn test_large_regime_is_stable_until_ttl() {
        let count = RecordCount::new();
        count.store(500);
        count.adjust(1, 100);
        assert_eq!(count.fresh(100, TTL), Some(500));
        assert_eq!(count.fresh(100, Duration::ZERO), None);
        // exact values never expire
        count.store(50);
        assert_eq!(count.fresh(100, Duration::ZERO), Some(50));
    }

    #[test]
    fn test_count_racing_a_write_is_not_stored() {
        let count = RecordCount::new();
        let before = count.generation();
        count.adjust(1, 100);
        assert!(!count.store_since(7, before));
        assert_eq!(count.peek(), None);

        let now = count.generation();
        assert!(count.store_since(8, now));
        assert_eq!(count.peek(), Some(8));

        let stale = count.generation();
        count.reset();
        assert!(!count.store_since(3, stale));
        assert_eq!(count.peek(), None);
    }

    #[test]
    fn test_reset_exact_keeps_large() {
        let count = RecordCount::new();
        count.store(500);
        count.reset_exact(100);
        assert_eq!(count.peek(), Some(500));
        count.store(5);
        count.reset_exact(100);
        assert_eq!(count.peek(), None);
    }
}
