//! Per-caller rotation through a route's alternate responses.

use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for one (caller, endpoint) pair.
///
/// Stores `last served index + 1`, so zero means nothing has been served yet.
#[derive(Default)]
struct RotationCounter(AtomicU64);

impl RotationCounter {
    fn advance(&self, max_alternates: u64) -> u64 {
        let old = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(next_state(v, max_alternates))
            })
            .unwrap_or_else(|e| {
                debug_assert!(false, "we never return None from fetch_update");
                e
            });
        next_state(old, max_alternates) - 1
    }
}

fn next_state(v: u64, max_alternates: u64) -> u64 {
    if v == 0 {
        1
    } else if v > max_alternates {
        // already past the cap; never move further and clamp if the cap shrank
        v.min(max_alternates + 1)
    } else {
        v + 1
    }
}

impl fmt::Debug for RotationCounter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = self.0.load(Ordering::Relaxed);
        f.debug_struct("RotationCounter")
            .field("last_index", &v.checked_sub(1))
            .finish()
    }
}

/// Tracks the last served alternate per (caller token, endpoint).
///
/// The first call for a pair returns 0, then each call returns the next
/// index until `max_alternates`, which is repeated from then on.
#[derive(Default)]
pub struct ResponseRotator {
    counters: RwLock<HashMap<(String, String), RotationCounter>>,
}

impl ResponseRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index to serve. 0 is the primary body, `n` is alternate `n - 1`.
    pub fn next_index(&self, endpoint_key: &str, caller_token: &str, max_alternates: usize) -> usize {
        let key = (caller_token.to_string(), endpoint_key.to_string());

        let mut counters = self.counters.read();
        // New pairs are inserted under the write lock, which is then downgraded.
        let counter = if let Some(counter) = counters.get(&key) {
            counter
        } else {
            drop(counters);
            let mut write = self.counters.write();
            write.entry(key.clone()).or_default();
            counters = RwLockWriteGuard::downgrade(write);
            match counters.get(&key) {
                Some(counter) => counter,
                None => return 0,
            }
        };
        counter.advance(max_alternates as u64) as usize
    }

    /// Number of tracked (caller, endpoint) pairs.
    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    pub fn reset_all(&self) {
        self.counters.write().clear();
    }
}

impl fmt::Debug for ResponseRotator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResponseRotator")
            .field("pairs", &self.len())
            .finish()
    }
}
