//! In-memory property cache with TTL eviction.
//!
//! Entries live in a `BTreeMap` behind a `parking_lot::RwLock`. A dedicated
//! cleaner thread sweeps expired entries, woken by a `Condvar` standing in
//! for a semaphore wakeup: the same coalesced-notification shape,
//! coalesced by `min_interval` and bounded by `max_interval` so the cleaner
//! never sleeps indefinitely even if nobody ever pokes it again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;

use crate::value::Value;

/// Sentinel duration meaning "never expires".
pub const DURATION_INF: Duration = Duration::MAX;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("not found")]
    NotFound,
}

struct CacheEntry {
    value: Value,
    modified: Instant,
    duration: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.duration == DURATION_INF || self.modified + self.duration > now
    }

    fn remaining(&self, now: Instant, min_duration: Duration) -> Duration {
        if self.duration == DURATION_INF {
            return DURATION_INF;
        }
        let expires_at = self.modified + self.duration;
        let remaining = expires_at.saturating_duration_since(now);
        remaining.max(min_duration)
    }
}

struct CleanerState {
    last_sweep: Instant,
    notified: bool,
}

/// A TTL-evicting property cache with a background cleaner thread.
pub struct Cache {
    map: RwLock<BTreeMap<String, CacheEntry>>,
    min_interval: Duration,
    max_interval: Duration,
    default_duration: Duration,
    min_duration: Duration,
    cleaner_state: Mutex<CleanerState>,
    cleaner_cv: Condvar,
    shutdown: AtomicBool,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Construct a cache and start its cleaner thread.
    pub fn new(
        min_interval: Duration,
        max_interval: Duration,
        default_duration: Duration,
        min_duration: Duration,
    ) -> Arc<Self> {
        let cache = Arc::new(Cache {
            map: RwLock::new(BTreeMap::new()),
            min_interval,
            max_interval,
            default_duration,
            min_duration,
            cleaner_state: Mutex::new(CleanerState {
                last_sweep: Instant::now(),
                notified: false,
            }),
            cleaner_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            cleaner: Mutex::new(None),
        });

        let worker = {
            let cache = cache.clone();
            std::thread::Builder::new()
                .name("propd-cache-cleaner".to_string())
                .spawn(move || cache.cleaner_loop())
                .expect("failed to spawn cache cleaner thread")
        };
        *cache.cleaner.lock() = Some(worker);
        cache
    }

    /// Look up `key`. Returns the value and its remaining TTL (clamped to
    /// at least `min_duration`), or `NotFound` if absent or expired. An
    /// expired entry pokes the cleaner before returning `NotFound`.
    pub fn get(&self, key: &str) -> Result<(Value, Duration), CacheError> {
        let now = Instant::now();
        let map = self.map.read();
        match map.get(key) {
            Some(entry) if entry.is_live(now) => {
                Ok((entry.value.clone(), entry.remaining(now, self.min_duration)))
            }
            Some(_) => {
                drop(map);
                self.notify_cleaner();
                Err(CacheError::NotFound)
            }
            None => Err(CacheError::NotFound),
        }
    }

    /// Insert or overwrite `key`. `duration == 0` substitutes
    /// `default_duration`; otherwise the duration is floored to
    /// `min_duration` unless it is the `∞` sentinel.
    pub fn set(&self, key: &str, value: Value, duration: Duration) {
        let duration = if duration.is_zero() {
            self.default_duration
        } else if duration == DURATION_INF {
            DURATION_INF
        } else {
            duration.max(self.min_duration)
        };

        let entry = CacheEntry {
            value,
            modified: Instant::now(),
            duration,
        };
        self.map.write().insert(key.to_string(), entry);
    }

    /// Remove `key`, reporting `NotFound` if it was absent.
    pub fn del(&self, key: &str) -> Result<(), CacheError> {
        self.map
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(CacheError::NotFound)
    }

    fn notify_cleaner(&self) {
        let mut state = self.cleaner_state.lock();
        state.notified = true;
        self.cleaner_cv.notify_one();
    }

    fn cleaner_loop(&self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            let mut state = self.cleaner_state.lock();
            if !state.notified {
                let timed_out = self
                    .cleaner_cv
                    .wait_for(&mut state, self.max_interval)
                    .timed_out();
                if self.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if !timed_out && !state.notified {
                    // Spurious wakeup; loop back and wait again.
                    continue;
                }
            }
            state.notified = false;

            let now = Instant::now();
            if now.duration_since(state.last_sweep) < self.min_interval {
                continue;
            }
            state.last_sweep = now;
            drop(state);

            self.sweep(now);
        }
    }

    fn sweep(&self, now: Instant) {
        let mut map = self.map.write();
        map.retain(|_, entry| entry.is_live(now));
    }

    /// Signal the cleaner thread to stop and join it. Safe to call
    /// multiple times.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.cleaner_state.lock();
            state.notified = true;
        }
        self.cleaner_cv.notify_all();
        if let Some(handle) = self.cleaner.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn small_cache() -> Arc<Cache> {
        Cache::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = small_cache();
        cache.set("x", Value::U32(1), Duration::from_secs(10));
        let (value, remaining) = cache.get("x").unwrap();
        assert_eq!(value, Value::U32(1));
        assert!(remaining <= Duration::from_secs(10));
        cache.shutdown();
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let cache = small_cache();
        assert!(matches!(cache.get("missing"), Err(CacheError::NotFound)));
        cache.shutdown();
    }

    #[test]
    fn zero_duration_uses_default() {
        let cache = small_cache();
        cache.set("x", Value::U32(1), Duration::ZERO);
        let (_, remaining) = cache.get("x").unwrap();
        assert!(remaining <= Duration::from_millis(50));
        cache.shutdown();
    }

    #[test]
    fn duration_floored_to_min_duration() {
        let cache = small_cache();
        cache.set("x", Value::U32(1), Duration::from_nanos(1));
        let (_, remaining) = cache.get("x").unwrap();
        assert!(remaining >= Duration::from_millis(5));
        cache.shutdown();
    }

    #[test]
    fn infinite_duration_never_expires() {
        let cache = small_cache();
        cache.set("x", Value::U32(1), DURATION_INF);
        std::thread::sleep(Duration::from_millis(60));
        let (_, remaining) = cache.get("x").unwrap();
        assert_eq!(remaining, DURATION_INF);
        cache.shutdown();
    }

    #[test]
    fn entry_expires_and_is_swept() {
        let cache = small_cache();
        cache.set("x", Value::U32(1), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(120));
        assert!(matches!(cache.get("x"), Err(CacheError::NotFound)));
        cache.shutdown();
    }

    #[test]
    fn del_reports_not_found_for_missing_key() {
        let cache = small_cache();
        assert!(matches!(cache.del("missing"), Err(CacheError::NotFound)));
        cache.set("x", Value::U32(1), Duration::from_secs(1));
        assert!(cache.del("x").is_ok());
        assert!(matches!(cache.get("x"), Err(CacheError::NotFound)));
        cache.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_joins_cleaner() {
        let cache = small_cache();
        cache.shutdown();
        cache.shutdown();
    }
}
