//! Cache Statistics Module
//!
//! Tracks fetch activity and deliveries of a cached value.

use serde::Serialize;

// == Cache Stats ==
/// Counters describing how a cached value has been used.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of fetch attempts launched
    pub fetches: u64,
    /// Number of fetch attempts that produced a value
    pub successes: u64,
    /// Number of fetch attempts that failed
    pub failures: u64,
    /// Number of callers that joined an attempt already in flight
    pub coalesced: u64,
    /// Number of values handed to consumers straight from the cache
    pub deliveries: u64,
    /// Number of explicit invalidations
    pub invalidations: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Failure Rate ==
    /// Returns failures / (successes + failures), or 0.0 if nothing completed.
    pub fn failure_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }

    pub fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced += 1;
    }

    pub fn record_delivery(&mut self) {
        self.deliveries += 1;
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }
}
