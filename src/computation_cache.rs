//! Request-level result cache.
//!
//! Results are keyed by a canonical fingerprint of the request parameters.
//! At most one computation runs per fingerprint at a time: concurrent callers
//! for the same fingerprint block until the running computation finishes and
//! then reuse its result. Failed computations are not cached, so a waiter
//! whose leader failed runs the computation itself.

use crate::analysis::AnalysisRequest;
use crate::errors::EffectResult;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Maximum number of cached results
pub const MAX_CACHE_SIZE: usize = 100;

/// Maximum age for cached results (30 minutes)
pub const MAX_CACHE_AGE: Duration = Duration::from_secs(30 * 60);

/// Canonical 64-bit identity of an analysis request.
///
/// Built on [`DefaultHasher`], whose algorithm may change between Rust
/// releases. Fingerprints are only comparable within one process and must
/// not be persisted or sent across process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint(u64);

impl RequestFingerprint {
    /// Fingerprint every parameter that influences the result.
    ///
    /// Asset order is significant since it fixes the matrix layout.
    pub fn of(request: &AnalysisRequest) -> Self {
        let mut hasher = DefaultHasher::new();
        request.asset_ids.len().hash(&mut hasher);
        for id in &request.asset_ids {
            id.hash(&mut hasher);
        }
        request.start_date.hash(&mut hasher);
        request.end_date.hash(&mut hasher);
        request.window_size.hash(&mut hasher);
        request.analysis_type.hash(&mut hasher);
        canonical_bits(request.lambda).hash(&mut hasher);
        request.correlation_scope.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Raw hash value
    pub fn value(self) -> u64 {
        self.0
    }
}

/// All NaNs share one bit pattern and -0.0 hashes as 0.0.
fn canonical_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a stored result
    pub hits: usize,
    /// Lookups that ran the computation
    pub misses: usize,
    /// Lookups that waited on another caller's computation
    pub coalesced: usize,
    /// Entries removed for size or age
    pub evictions: usize,
}

impl CacheStats {
    /// Share of lookups that did not run a computation
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

struct CacheState<V> {
    entries: HashMap<RequestFingerprint, CacheEntry<V>>,
    in_flight: HashSet<RequestFingerprint>,
    stats: CacheStats,
}

/// Bounded, age-limited, single-flight result cache.
pub struct AnalysisCache<V> {
    state: Mutex<CacheState<V>>,
    finished: Condvar,
    max_entries: usize,
    max_age: Duration,
}

impl<V: Clone> Default for AnalysisCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> AnalysisCache<V> {
    /// Cache with the default size and age limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_CACHE_SIZE, MAX_CACHE_AGE)
    }

    /// Cache with explicit limits. `max_entries` is raised to at least 1.
    pub fn with_limits(max_entries: usize, max_age: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashSet::new(),
                stats: CacheStats::default(),
            }),
            finished: Condvar::new(),
            max_entries: max_entries.max(1),
            max_age,
        }
    }

    /// Return the cached value for `key` or run `compute` to produce it.
    pub fn get_or_compute<F>(&self, key: RequestFingerprint, compute: F) -> EffectResult<V>
    where
        F: FnOnce() -> EffectResult<V>,
    {
        {
            let mut state = self.state.lock();
            let mut waited = false;
            loop {
                if let Some(entry) = state.entries.get(&key) {
                    if entry.inserted.elapsed() < self.max_age {
                        let value = entry.value.clone();
                        state.stats.hits += 1;
                        if waited {
                            state.stats.coalesced += 1;
                        }
                        return Ok(value);
                    }
                    state.entries.remove(&key);
                    state.stats.evictions += 1;
                }

                if state.in_flight.contains(&key) {
                    waited = true;
                    self.finished.wait(&mut state);
                    continue;
                }

                state.in_flight.insert(key);
                state.stats.misses += 1;
                break;
            }
        }

        let flight = InFlight { cache: self, key };
        let result = compute();

        if let Ok(value) = &result {
            let mut state = self.state.lock();
            self.make_room(&mut state);
            state.entries.insert(
                key,
                CacheEntry {
                    value: value.clone(),
                    inserted: Instant::now(),
                },
            );
        } else {
            log::debug!("Computation for {:016x} failed; not cached", key.value());
        }
        drop(flight);

        result
    }

    /// Stored value for `key`, if present and fresh
    pub fn get(&self, key: RequestFingerprint) -> Option<V> {
        let state = self.state.lock();
        state
            .entries
            .get(&key)
            .filter(|entry| entry.inserted.elapsed() < self.max_age)
            .map(|entry| entry.value.clone())
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }

    /// Drop every stored entry. Running computations are unaffected.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    fn make_room(&self, state: &mut CacheState<V>) {
        if state.entries.len() < self.max_entries {
            return;
        }

        let max_age = self.max_age;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.inserted.elapsed() < max_age);
        let mut evicted = before - state.entries.len();

        while state.entries.len() >= self.max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| *key);
            match oldest {
                Some(key) => {
                    state.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        state.stats.evictions += evicted;
        log::debug!("Evicted {} cached results", evicted);
    }
}

/// Clears the in-flight marker and wakes waiters, also on unwind.
struct InFlight<'a, V> {
    cache: &'a AnalysisCache<V>,
    key: RequestFingerprint,
}

impl<V> Drop for InFlight<'_, V> {
    fn drop(&mut self) {
        self.cache.state.lock().in_flight.remove(&self.key);
        self.cache.finished.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EffectAnalysisError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn key(n: u64) -> RequestFingerprint {
        RequestFingerprint(n)
    }

    #[test]
    fn test_hit_after_miss() {
        let cache: AnalysisCache<Vec<f64>> = AnalysisCache::new();
        let first = cache.get_or_compute(key(1), || Ok(vec![1.0, 2.0])).unwrap();
        let second = cache
            .get_or_compute(key(1), || panic!("must not recompute"))
            .unwrap();

        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache: AnalysisCache<u32> = AnalysisCache::new();
        let failed = cache.get_or_compute(key(7), || {
            Err(EffectAnalysisError::NumericalError {
                reason: "boom".to_string(),
                operation: None,
            })
        });
        assert!(failed.is_err());
        assert!(cache.is_empty());

        assert_eq!(cache.get_or_compute(key(7), || Ok(3)).unwrap(), 3);
        assert_eq!(cache.get(key(7)), Some(3));
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let cache: AnalysisCache<u64> = AnalysisCache::with_limits(2, MAX_CACHE_AGE);
        for n in 0..3 {
            cache.get_or_compute(key(n), || Ok(n)).unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(key(0)), None);
        assert_eq!(cache.get(key(2)), Some(2));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_expired_entries_recompute() {
        let cache: AnalysisCache<u64> = AnalysisCache::with_limits(10, Duration::ZERO);
        cache.get_or_compute(key(1), || Ok(1)).unwrap();
        assert_eq!(cache.get(key(1)), None);
        assert_eq!(cache.get_or_compute(key(1), || Ok(2)).unwrap(), 2);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let cache: Arc<AnalysisCache<u64>> = Arc::new(AnalysisCache::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(key(42), || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(99)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 99);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }

    #[test]
    fn test_fingerprint_tracks_request_parameters() {
        let day = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let request = |ids: &[&str]| {
            AnalysisRequest::new(
                ids.iter().map(|s| s.to_string()).collect(),
                day,
                day + chrono::Duration::days(30),
                10,
            )
        };

        let base = RequestFingerprint::of(&request(&["A", "B"]));
        assert_eq!(base, RequestFingerprint::of(&request(&["A", "B"])));
        assert_ne!(base, RequestFingerprint::of(&request(&["B", "A"])));
        assert_ne!(base, RequestFingerprint::of(&request(&["A", "B"]).with_lambda(2.5)));
        assert_eq!(
            RequestFingerprint::of(&request(&["A"]).with_lambda(0.0)),
            RequestFingerprint::of(&request(&["A"]).with_lambda(-0.0))
        );
    }

    #[test]
    fn test_lambda_canonicalization() {
        assert_eq!(canonical_bits(-0.0), canonical_bits(0.0));
        assert_eq!(canonical_bits(f64::NAN), canonical_bits(-f64::NAN));
        assert_ne!(canonical_bits(2.0), canonical_bits(2.5));
    }
}
